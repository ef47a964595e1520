use std::collections::BTreeMap;
use std::path::PathBuf;

use ladder::{
    ItemId, MasteryLevel, Snapshot,
    snapshot::parse_archived_blob,
    stats::{ProgressStats, overall_progress},
};

fn read_file(path: &PathBuf) -> String {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            eprintln!("Error reading file '{}': {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args.len() > 3 {
        eprintln!("Usage: {} <kanji-progress.json> [kanji-archived.json]", args[0]);
        eprintln!(
            "\nExample: {} ./kanji-progress.json ./kanji-archived.json",
            args[0]
        );
        std::process::exit(1);
    }

    let levels_path = PathBuf::from(&args[1]);
    let levels_blob = read_file(&levels_path);

    println!("LadderScope - Progress Blob Analyzer");
    println!("====================================");
    println!("File: {}", levels_path.display());
    println!("Size: {} bytes", levels_blob.len());
    println!();

    // read the raw numbers so values off the ladder can be reported
    let raw: BTreeMap<ItemId, i64> = match serde_json::from_str(&levels_blob) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("Not a progress blob: {e}");
            eprintln!("The app treats a blob like this as empty and leaves it in place.");
            std::process::exit(1);
        }
    };

    let archived = match args.get(2) {
        Some(path) => {
            let path = PathBuf::from(path);
            match parse_archived_blob(&read_file(&path)) {
                Ok(archived) => archived,
                Err(e) => {
                    eprintln!("Not an archive blob ({}): {e}", path.display());
                    std::process::exit(1);
                }
            }
        }
        None => Default::default(),
    };

    println!("Off-ladder values:");
    println!("------------------");
    let mut off_ladder = 0;
    for (item_id, value) in &raw {
        if MasteryLevel::try_from(*value).is_err() {
            off_ladder += 1;
            println!(
                "  ⚠️  Item {item_id}: {value} (read as {})",
                MasteryLevel::bucket(*value).label()
            );
        }
    }
    if off_ladder == 0 {
        println!("  None");
    }
    println!();

    let snapshot = Snapshot::from_parts(
        raw.iter()
            .map(|(item_id, value)| (*item_id, MasteryLevel::bucket(*value))),
        archived.iter().copied(),
    );

    println!("Levels:");
    println!("-------");
    for level in MasteryLevel::ALL {
        let items: Vec<ItemId> = snapshot
            .levels()
            .filter(|(_, l)| *l == level)
            .map(|(item_id, _)| item_id)
            .collect();
        println!("  {:<11} {:>5}", level.label(), items.len());
    }
    println!();

    let stats = ProgressStats::of(&snapshot);
    println!("Summary:");
    println!("--------");
    println!("  Records: {}", stats.total);
    println!("  Completed: {}", stats.completed);
    println!("  In progress: {}", stats.in_progress);
    println!("  Archived: {}", archived.len());
    println!(
        "  Average level: {:.2}",
        overall_progress(&snapshot, snapshot.len())
    );

    let orphaned: Vec<&ItemId> = archived
        .iter()
        .filter(|item_id| !raw.contains_key(item_id))
        .collect();
    if !orphaned.is_empty() {
        println!();
        println!("  Archived without a level (read as Locked): {orphaned:?}");
    }
}
