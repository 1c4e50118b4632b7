use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Where a printed message came from.
pub struct MessageSource<'a> {
    pub protocol: &'a str,
    pub discriminator: Option<&'a [u8]>,
    pub peer: &'a str,
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    protocol: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    discriminator: Option<String>,
    payload_size: usize,
    payload: String,
    peer: &'a str,
    timestamp: String,
}

pub fn print_message(source: &MessageSource<'_>, payload: &[u8], format: OutputFormat) {
    let discriminator = source.discriminator.map(payload_preview);
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                protocol: source.protocol,
                discriminator,
                payload_size: payload.len(),
                payload: payload_preview(payload),
                peer: source.peer,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PROTOCOL", "DISCRIMINATOR", "SIZE", "PEER", "PAYLOAD"])
                .add_row(vec![
                    source.protocol.to_string(),
                    discriminator.unwrap_or_else(|| "-".to_string()),
                    payload.len().to_string(),
                    source.peer.to_string(),
                    payload_preview(payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "protocol={} discriminator={} size={} peer={} payload={}",
                source.protocol,
                discriminator.as_deref().unwrap_or("-"),
                payload.len(),
                source.peer,
                payload_preview(payload)
            );
        }
        OutputFormat::Raw => {
            print_raw(payload);
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
