use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;

use watermark_restore::{
    default_output_path, ProcessOptions, ProcessResult, WatermarkEngine, WatermarkSize,
};

#[derive(Parser)]
#[command(
    name = "watermark-restore",
    about = "Reconstruct original pixels beneath Gemini and Veo watermarks",
    version,
    after_help = "Simple usage: watermark-restore <image>  (detect and restore in-place)\n\n\
                  NOTE: This tool only restores the VISIBLE watermarks (Gemini sparkle,\n\
                  Veo text). It cannot remove SynthID (invisible watermark)."
)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Input image file or directory
    input: String,

    /// Output file or directory (default: {name}_cleaned.{ext})
    #[arg(short, long)]
    output: Option<String>,

    /// Directory holding the reference opacity maps (bg_48.png, bg_96.png)
    #[arg(long, default_value = "assets")]
    assets: String,

    /// Skip the presence test, reverse the blend unconditionally
    #[arg(short, long)]
    force: bool,

    /// Also reconstruct the Veo overlay region
    #[arg(long)]
    veo: bool,

    /// Force the 48x48 watermark size (for images <= 1024px)
    #[arg(long)]
    force_small: bool,

    /// Force the 96x96 watermark size (for images > 1024px)
    #[arg(long)]
    force_large: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.force_small && cli.force_large {
        eprintln!("Error: Cannot specify both --force-small and --force-large");
        process::exit(1);
    }

    let force_size = if cli.force_small {
        Some(WatermarkSize::Small)
    } else if cli.force_large {
        Some(WatermarkSize::Large)
    } else {
        None
    };

    let opts = ProcessOptions {
        force: cli.force,
        force_size,
        veo: cli.veo,
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    let engine = WatermarkEngine::new(&cli.assets);

    let input_path = Path::new(&cli.input);
    if !input_path.exists() {
        eprintln!("Error: Input path does not exist: {}", cli.input);
        process::exit(1);
    }

    if !opts.quiet && opts.force {
        eprintln!("WARNING: Force mode - reversing the blend on ALL images without detection!");
        eprintln!();
    }

    let results = if input_path.is_dir() {
        let output_dir = if let Some(o) = &cli.output {
            PathBuf::from(o)
        } else {
            eprintln!("Error: Output directory is required for batch processing");
            eprintln!("Usage: watermark-restore <input_dir> -o <output_dir>");
            process::exit(1);
        };
        engine.process_directory(input_path, &output_dir, &opts)
    } else {
        let output_path = match &cli.output {
            Some(o) => PathBuf::from(o),
            None => default_output_path(input_path),
        };
        vec![engine.process_file(input_path, &output_path, &opts)]
    };

    let mut success_count = 0u32;
    let mut skip_count = 0u32;
    let mut fail_count = 0u32;

    for r in &results {
        print_result(r, &opts);
        if r.skipped {
            skip_count += 1;
        } else if r.success {
            success_count += 1;
        } else {
            fail_count += 1;
        }
    }

    if results.len() > 1 && !opts.quiet {
        eprintln!();
        eprint!("[Summary] Restored: {success_count}");
        if skip_count > 0 {
            eprint!(", Skipped: {skip_count}");
        }
        if fail_count > 0 {
            eprint!(", Failed: {fail_count}");
        }
        eprintln!(" (Total: {})", results.len());
    }

    if fail_count > 0 {
        process::exit(1);
    }
}

fn print_result(result: &ProcessResult, opts: &ProcessOptions) {
    if opts.quiet && result.success {
        return;
    }

    let filename = result.path.file_name().map_or_else(
        || result.path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    );

    if result.skipped {
        if !opts.quiet {
            eprintln!("[SKIP] {filename}: {}", result.message);
        }
    } else if result.success {
        if !opts.quiet {
            eprintln!("[OK] {filename}: {}", result.message);
        }
    } else {
        eprintln!("[FAIL] {filename}: {}", result.message);
    }

    if opts.verbose && !result.message.is_empty() {
        eprintln!("  -> {}", result.message);
    }
}
