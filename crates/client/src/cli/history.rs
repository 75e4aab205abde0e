use cs_domain::config::Config;
use cs_sessions::HistoryEntry;

/// Print the stored history of the configured conversation.
pub fn run(config: &Config, json_output: bool) -> anyhow::Result<()> {
    let store = super::open_store(config)?;
    let entries = store.load(&config.conversation.id)?;

    if json_output {
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| anyhow::anyhow!("serializing history: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    if entries.is_empty() {
        eprintln!("(no history for conversation {:?})", config.conversation.id);
        return Ok(());
    }
    print_entries(&entries);
    Ok(())
}

pub fn print_entries(entries: &[HistoryEntry]) {
    let mut turn = 0;
    for entry in entries {
        let at = entry.at().format("%Y-%m-%d %H:%M:%S");
        match entry {
            HistoryEntry::User(m) => {
                turn += 1;
                println!("[{turn}] {at} you> {}", m.content);
            }
            HistoryEntry::Bot(m) if m.is_failure() => {
                println!("    {at} bot> (failed) {}", m.content);
            }
            HistoryEntry::Bot(m) => {
                println!("    {at} bot> {}", m.content);
                if !m.citations.is_empty() {
                    println!("        {} source(s)", m.citations.len());
                }
            }
        }
    }
}
