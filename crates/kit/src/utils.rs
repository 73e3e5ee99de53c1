//! Small shared helpers: size parsing and host tool lookup.

use camino::Utf8PathBuf;
use color_eyre::eyre::eyre;
use color_eyre::Result;

/// Parse size string (e.g., "10G", "5120M", "1T") to bytes
pub fn parse_size(size_str: &str) -> Result<u64> {
    let size_str = size_str.trim().to_uppercase();

    if size_str.is_empty() {
        return Err(eyre!("Empty size string"));
    }

    let (number_part, unit_part) = if let Some(pos) = size_str.rfind(|c: char| c.is_ascii_digit()) {
        let (num, unit) = size_str.split_at(pos + 1);
        (num, unit)
    } else {
        return Err(eyre!("Invalid size format: {}", size_str));
    };

    let number: u64 = number_part
        .parse()
        .map_err(|_| eyre!("Invalid number in size: {}", number_part))?;

    let multiplier = match unit_part {
        "" | "B" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        "T" | "TB" => 1024_u64.pow(4),
        _ => return Err(eyre!("Unknown size unit: {}", unit_part)),
    };

    Ok(number * multiplier)
}

/// Parse a memory string (like "2G", "1024M", "512") to megabytes
pub fn parse_memory_to_mb(memory_str: &str) -> Result<u32> {
    let memory_str = memory_str.trim();

    if memory_str.is_empty() {
        return Err(eyre!("Memory string cannot be empty"));
    }

    match memory_str.chars().last() {
        Some(c) if c.eq_ignore_ascii_case(&'G') => {
            let gb: f64 = memory_str[..memory_str.len() - 1]
                .parse()
                .map_err(|_| eyre!("Invalid number in memory specification: {memory_str}"))?;
            Ok((gb * 1024.0) as u32)
        }
        Some(c) if c.eq_ignore_ascii_case(&'M') => memory_str[..memory_str.len() - 1]
            .parse()
            .map_err(|_| eyre!("Invalid number in memory specification: {memory_str}")),
        Some(c) if c.eq_ignore_ascii_case(&'K') => {
            let kb: u32 = memory_str[..memory_str.len() - 1]
                .parse()
                .map_err(|_| eyre!("Invalid number in memory specification: {memory_str}"))?;
            Ok(kb / 1024)
        }
        // No suffix, assume megabytes
        Some(_) => memory_str
            .parse()
            .map_err(|_| eyre!("Invalid number in memory specification: {memory_str}")),
        None => Err(eyre!(
            "Memory specification cannot be empty - please provide a value like '2G', '1024M', or '512'"
        )),
    }
}

/// Locate an executable on PATH, returning its full path.
pub fn find_tool(tool: &str) -> Option<Utf8PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join(tool);
        if candidate.is_file() {
            if let Ok(p) = Utf8PathBuf::from_path_buf(candidate) {
                return Some(p);
            }
        }
    }
    None
}

/// Require an executable on PATH; the error names the tool and how to get it.
pub fn require_tool(tool: &str, hint: &str) -> Result<Utf8PathBuf> {
    find_tool(tool).ok_or_else(|| {
        eyre!("Required tool '{tool}' not found on PATH. Install it first ({hint}), or run 'obik deps'.")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() -> Result<()> {
        assert_eq!(parse_size("10G")?, 10 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("5120M")?, 5120 * 1024 * 1024);
        assert_eq!(parse_size("1024")?, 1024);
        assert_eq!(parse_size("2T")?, 2 * 1024_u64.pow(4));
        assert!(parse_size("").is_err());
        assert!(parse_size("10X").is_err());
        Ok(())
    }

    #[test]
    fn test_parse_memory_to_mb() -> Result<()> {
        assert_eq!(parse_memory_to_mb("2G")?, 2048);
        assert_eq!(parse_memory_to_mb("1024M")?, 1024);
        assert_eq!(parse_memory_to_mb("512")?, 512);
        assert_eq!(parse_memory_to_mb("2048K")?, 2);
        assert!(parse_memory_to_mb("").is_err());
        assert!(parse_memory_to_mb("abc").is_err());
        Ok(())
    }

    #[test]
    fn test_find_tool() {
        // 'sh' exists on any host these tests run on
        assert!(find_tool("sh").is_some());
        assert!(find_tool("definitely-not-a-real-tool-xyz").is_none());
    }
}
