//! Batching example.
//!
//! Many concurrent writers each submit one row; the batcher turns them into
//! a handful of bulk inserts.
//!
//! Run with: cargo run --example batching

use resiliency::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("=== Batching Example ===\n");

    let inserts = Arc::new(AtomicUsize::new(0));
    let batcher = {
        let inserts = Arc::clone(&inserts);
        Batcher::new(Duration::from_millis(20), move |rows: Vec<u32>| {
            let inserts = Arc::clone(&inserts);
            async move {
                inserts.fetch_add(1, Ordering::SeqCst);
                println!("Bulk insert of {} rows: {:?}", rows.len(), rows);
                Ok::<(), String>(())
            }
        })
        .with_prefilter(|row: &u32| {
            if *row == 13 {
                Err("row 13 is reserved".to_string())
            } else {
                Ok(())
            }
        })
    };

    let writers: Vec<_> = (0..25)
        .map(|row| {
            let batcher = batcher.clone();
            tokio::spawn(async move {
                // Spread the writers over a few batch windows.
                tokio::time::sleep(Duration::from_millis(u64::from(row) * 2)).await;
                (row, batcher.run(row).await)
            })
        })
        .collect();

    for writer in writers {
        let (row, result) = writer.await?;
        if let Err(e) = result {
            println!("Row {row} not written: {e}");
        }
    }

    batcher.shutdown(true).await;

    println!("\n25 rows written with {} inserts", inserts.load(Ordering::SeqCst));
    Ok(())
}
