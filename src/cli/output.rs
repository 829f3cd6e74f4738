//! Output formatting for the command-line front-end

use clap::ValueEnum;

/// CLI output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format for scripting
    Json,
    /// Hex dump
    Hex,
}

/// Format a received payload
pub fn format_payload(data: &[u8], format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => escaped_format(data),
        OutputFormat::Hex => hex_format(data),
        OutputFormat::Json => serde_json::json!({
            "data": String::from_utf8_lossy(data),
            "hex": hex::encode(data),
            "length": data.len()
        })
        .to_string(),
    }
}

fn hex_format(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn escaped_format(data: &[u8]) -> String {
    data.iter()
        .map(|&b| match b {
            0x00 => "\\0".to_string(),
            0x09 => "\\t".to_string(),
            0x0a => "\\n".to_string(),
            0x0d => "\\r".to_string(),
            0x20..=0x7e => (b as char).to_string(),
            _ => format!("\\x{b:02x}"),
        })
        .collect()
}
