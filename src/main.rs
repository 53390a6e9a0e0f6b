// main.rs - CLI entry point

use cgcall::cli::Config;
use cgcall::core::GenePredictor;
use cgcall::prelude::*;
use std::time::Instant;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run_main() {
        eprintln!("❌ ERROR: {}", e);
        std::process::exit(1);
    }
}

fn run_main() -> Result<(), String> {
    let mut args: Args = argh::from_env();
    let command_line = std::env::args().collect::<Vec<String>>().join(" ");

    // Handle generate config first
    if args.generate_config {
        let sample_config = Config::generate_sample();
        println!("{}", sample_config);
        println!("\n💡 Save this content to a .toml file and use --config /path/to/config.toml");
        return Ok(());
    }

    // Load configuration file if specified
    if let Some(config_path) = args.config.clone() {
        args = args.with_config_file(&config_path)?;
    }

    let ValidationResult { config, loci_filter } = validate_args(&args)?;

    println!("🚀 cgcall v{}", cgcall::VERSION);

    // Configure thread pool
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.cpu)
        .build_global()
        .map_err(|e| format!("Failed to configure thread pool: {}", e))?;
    match args.cpu {
        Some(n) => println!("🧵 Threads: {}", n),
        None => println!("🧵 Threads: {} (auto-detected)", config.cpu),
    }

    let registry = HasherRegistry::new();
    let hasher = registry
        .get_hasher(&config.hasher_type)
        .ok_or_else(|| format!("Invalid hasher type '{}'", config.hasher_type))?;
    println!("🔨 Hasher: {}", config.hasher_type);

    let aligner = BlastAligner::locate(config.blast_path.as_deref())
        .map_err(|e| e.to_string())?;

    let predictor = if config.cds_input {
        println!("🧬 CDS input: gene prediction skipped");
        None
    } else {
        let predictor = ProdigalPredictor::locate(
            config.prodigal_path.as_deref(),
            config.translation_table,
            config.prodigal_mode,
        )
        .map_err(|e| e.to_string())?
        .with_training_file(config.ptf.clone());
        if let Some(ptf) = &config.ptf {
            println!("🧬 Training file: {}", ptf.display());
        }
        Some(predictor)
    };

    let output_directory = config.output_directory.clone();
    let caller = AlleleCaller::new(
        config,
        hasher,
        &aligner,
        predictor.as_ref().map(|p| p as &dyn GenePredictor),
        loci_filter,
    );

    if args.dry_run {
        let (inputs, loci) = caller.dry_run().map_err(|e| e.to_string())?;
        println!("📁 Inputs: {} files", inputs);
        println!("📚 Loci: {}", loci);
        println!("✅ Dry run completed successfully");
        return Ok(());
    }

    let total_start = Instant::now();
    let run = caller.run().map_err(|e| e.to_string())?;

    write_outputs(&output_directory, &run, caller.config(), &command_line)?;

    if let Some(update) = &run.schema_update {
        println!(
            "📚 Schema updated: {} alleles, {} representatives across {} loci",
            update.alleles_added, update.representatives_added, update.loci_updated
        );
    }
    println!("🎉 Completed in {:.2}s", total_start.elapsed().as_secs_f64());
    Ok(())
}
