//! Restore the watermarked corner of a single image.
//!
//! Usage:
//! ```sh
//! cargo run --example clean_image -- input.jpg output.jpg [assets_dir]
//! ```

use std::env;
use std::process;

use watermark_restore::{ProcessOptions, WatermarkEngine};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <input> <output> [assets_dir]", args[0]);
        process::exit(1);
    }

    let input = &args[1];
    let output = &args[2];
    let assets = args.get(3).map_or("assets", String::as_str);

    let engine = WatermarkEngine::new(assets);
    let opts = ProcessOptions::default();
    let result = engine.process_file(input.as_ref(), output.as_ref(), &opts);

    if result.skipped {
        println!("Skipped: {}", result.message);
    } else if result.success {
        println!("Done: {}", result.message);
    } else {
        eprintln!("Error: {}", result.message);
        process::exit(1);
    }
}
