use std::error::Error;

use crate::core::config::Config;
use crate::core::streams::{open_store, StreamRecord};

pub async fn list_streams(config: &Config, conversation_id: &str) -> Result<(), Box<dyn Error>> {
    let Some(store) = open_store(config)? else {
        println!("No stream registry configured.");
        return Ok(());
    };

    let records = store.records_for(conversation_id).await?;
    if records.is_empty() {
        println!("No streams recorded for {conversation_id}.");
        return Ok(());
    }
    for line in render_records(&records) {
        println!("{line}");
    }
    Ok(())
}

pub(crate) fn render_records(records: &[StreamRecord]) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let finished = record.completed_at.or(record.cancelled_at);
            let mut line = format!(
                "{}  {:<9}  started {}",
                record.stream_id,
                record.status().as_str(),
                record.created_at.to_rfc3339()
            );
            if let Some(at) = finished {
                line.push_str(&format!("  ended {}", at.to_rfc3339()));
            }
            line
        })
        .collect()
}
