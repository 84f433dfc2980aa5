//! # Seed Data Generator
//!
//! Queues sample offline records for development, as if a field device had
//! been counting stock without a network.
//!
//! ## Usage
//! ```bash
//! # Queue 30 records (default)
//! cargo run -p fieldstock-db --bin seed
//!
//! # Custom amount and database path
//! cargo run -p fieldstock-db --bin seed -- --count 200 --db ./data/fieldstock.db
//! ```
//!
//! Records cycle through the three entity kinds: item counts, stock
//! movements and transfers between a handful of locations.

use chrono::{Duration, Utc};
use std::env;
use tracing_subscriber::EnvFilter;

use fieldstock_core::{
    EntityPayload, InventoryItemPayload, StockMovement, StockTransactionPayload, TransferPayload,
};
use fieldstock_db::{Database, DbConfig};

const ITEMS: &[(&str, &str, &str)] = &[
    ("BOLT-M8-40", "Hex bolt M8x40", "pcs"),
    ("NUT-M8", "Hex nut M8", "pcs"),
    ("WASH-M8", "Washer M8", "pcs"),
    ("CBL-TIE-200", "Cable tie 200mm", "pcs"),
    ("TAPE-PVC-19", "PVC tape 19mm", "roll"),
    ("GLV-NIT-L", "Nitrile gloves L", "box"),
    ("PIPE-CU-15", "Copper pipe 15mm", "m"),
    ("SEAL-SIL", "Silicone sealant", "tube"),
];

const LOCATIONS: &[&str] = &["DOCK", "AISLE-1", "AISLE-2", "AISLE-3", "VAN-7"];

fn sample_payload(index: usize) -> EntityPayload {
    let (sku, name, unit) = ITEMS[index % ITEMS.len()];
    let item_id = format!("itm-{:04}", index % ITEMS.len());
    let location = LOCATIONS[index % LOCATIONS.len()];
    let when = Utc::now() - Duration::minutes((index * 7) as i64);

    match index % 3 {
        0 => EntityPayload::InventoryItem(InventoryItemPayload {
            item_id,
            sku: sku.to_string(),
            name: name.to_string(),
            quantity: ((index * 37) % 500) as i64,
            unit: Some(unit.to_string()),
            location: Some(location.to_string()),
            barcode: None,
        }),
        1 => EntityPayload::StockTransaction(StockTransactionPayload {
            transaction_id: format!("txn-{:05}", index),
            item_id,
            movement: if index % 2 == 0 {
                StockMovement::Receipt
            } else {
                StockMovement::Issue
            },
            quantity: (index % 20 + 1) as i64,
            reference: Some(format!("WO-{}", 1000 + index)),
            occurred_at: when,
        }),
        _ => EntityPayload::Transfer(TransferPayload {
            transfer_id: format!("trf-{:05}", index),
            item_id,
            from_location: location.to_string(),
            to_location: LOCATIONS[(index + 1) % LOCATIONS.len()].to_string(),
            quantity: (index % 12 + 1) as i64,
            requested_at: when,
        }),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();

    let mut count: usize = 30;
    let mut db_path = String::from("./fieldstock_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(30);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Fieldstock Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of records to queue (default: 30)");
                println!("  -d, --db <PATH>    Database file path (default: ./fieldstock_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Fieldstock Seed Data Generator");
    println!("==============================");
    println!("Database: {}", db_path);
    println!("Records:  {}", count);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");

    let mut queued = 0;
    for index in 0..count {
        let payload = sample_payload(index);
        if let Err(e) = payload.validate() {
            eprintln!("Skipping {}: {}", payload.label(), e);
            continue;
        }

        db.records().enqueue(&payload).await?;
        queued += 1;
    }

    let stats = db.records().stats().await?;
    println!("✓ Queued {} records", queued);
    println!();
    println!("Pending by kind:");
    for (kind, n) in &stats.pending_by_kind {
        println!("  {:<18} {}", kind.as_str(), n);
    }
    println!("Total pending: {}", stats.pending_count);

    db.close().await;
    Ok(())
}
