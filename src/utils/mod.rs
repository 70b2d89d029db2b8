/// Normalize MAC address to lowercase with colons.
/// Accepts EOS dotted form ("2899.3abe.9f92") as well as colon/dash separated forms.
pub fn normalize_mac(mac: &str) -> String {
    // Remove any existing separators
    let clean: String = mac
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect();

    // Convert to lowercase and insert colons
    if clean.len() != 12 {
        return mac.trim().to_lowercase();
    }

    clean
        .chars()
        .collect::<Vec<_>>()
        .chunks(2)
        .map(|c| c.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(":")
        .to_lowercase()
}

/// Hostname without its domain part, lowercased ("Leaf1.dc1.example.net" -> "leaf1")
pub fn short_hostname(name: &str) -> String {
    name.trim()
        .split('.')
        .next()
        .unwrap_or("")
        .to_lowercase()
}

/// Validate a hostname.
/// Allows alphanumeric, hyphens, dots, and underscores. No path separators or shell metacharacters.
pub fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 253 {
        return false;
    }
    hostname.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
}

/// Truncate output to a maximum number of lines
pub fn truncate_lines(s: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = s.lines().collect();
    if lines.len() <= max_lines {
        s.to_string()
    } else {
        let truncated: Vec<&str> = lines[..max_lines].to_vec();
        format!("{}\n... ({} more lines)", truncated.join("\n"), lines.len() - max_lines)
    }
}

/// Sort key that orders interface names naturally: Ethernet2 before Ethernet10,
/// Ethernet49/1 before Ethernet49/2.
pub fn interface_sort_key(name: &str) -> (String, Vec<u32>) {
    let split = name.find(|c: char| c.is_ascii_digit()).unwrap_or(name.len());
    let prefix = name[..split].to_lowercase();
    let numbers = name[split..]
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    (prefix, numbers)
}
