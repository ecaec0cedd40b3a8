//! Label file parsing.
//!
//! Two whitespace-delimited line forms are accepted:
//!
//! ```text
//! al 0600 .start
//! 0 0600 start
//! ```
//!
//! In the second form the first field is a memory page; only page 0 is used.

fn parse_hex(s: &str) -> Option<u32> {
    let s = s.trim_start_matches('$');
    let s = s.strip_prefix("C:").unwrap_or(s);
    u32::from_str_radix(s, 16).ok()
}

fn parse_addr(s: &str) -> Result<u16, String> {
    match parse_hex(s) {
        Some(v) if v <= 0xFFFF => Ok(v as u16),
        _ => Err(format!("invalid address '{}'", s)),
    }
}

/// Parses one line. `Ok(None)` for blank lines, comments and labels outside
/// page 0; `Err` with a message for malformed lines.
pub fn parse_line(line: &str) -> Result<Option<(u16, String)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
        return Ok(None);
    }
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 3 {
        return Err(format!("expected 3 fields, found {}", fields.len()));
    }
    if fields[0] == "al" {
        let addr = parse_addr(fields[1])?;
        let name = fields[2]
            .strip_prefix('.')
            .ok_or_else(|| format!("label '{}' does not start with '.'", fields[2]))?;
        if name.is_empty() {
            return Err("empty label name".to_string());
        }
        return Ok(Some((addr, name.to_string())));
    }
    let page = parse_hex(fields[0]).ok_or_else(|| format!("invalid page '{}'", fields[0]))?;
    let addr = parse_addr(fields[1])?;
    if page != 0 {
        log::debug!("skipping label '{}' in page {:X}", fields[2], page);
        return Ok(None);
    }
    Ok(Some((addr, fields[2].to_string())))
}
