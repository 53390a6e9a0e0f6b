// merge.rs - Merge configuration file with CLI arguments

use crate::cli::{Args, Config};

/// Replace `current` with the config value only while it still holds the default
fn override_default<T: PartialEq>(current: &mut T, default: T, value: Option<T>) {
    if let Some(value) = value {
        if *current == default {
            *current = value;
        }
    }
}

impl Args {
    /// Merge with configuration from file
    /// CLI arguments take precedence over config file values
    pub fn merge_with_config(mut self, config: Config) -> Self {
        // Input/Output
        if self.input_files.is_none() {
            self.input_files = config.input_files;
        }
        if self.schema_directory.is_none() {
            self.schema_directory = config.schema_directory;
        }
        if self.output_directory.is_none() {
            self.output_directory = config.output_directory;
        }
        if self.ptf.is_none() {
            self.ptf = config.ptf;
        }

        // Classification (only override defaults, not explicit CLI values)
        override_default(&mut self.bsr, 0.6, config.bsr);
        override_default(&mut self.minimum_length, 201, config.minimum_length);
        override_default(&mut self.translation_table, 11, config.translation_table);
        override_default(&mut self.size_threshold, 0.2, config.size_threshold);

        // Clustering
        override_default(&mut self.word_size, 5, config.word_size);
        override_default(&mut self.window_size, 5, config.window_size);
        override_default(&mut self.clustering_sim, 0.2, config.clustering_sim);
        override_default(&mut self.clustering_mode, "greedy".to_string(), config.clustering_mode);

        // External tools
        if self.cpu.is_none() {
            self.cpu = config.cpu;
        }
        if self.blast_path.is_none() {
            self.blast_path = config.blast_path;
        }
        if self.prodigal_path.is_none() {
            self.prodigal_path = config.prodigal_path;
        }
        override_default(&mut self.prodigal_mode, "single".to_string(), config.prodigal_mode);

        // Loci selection
        override_default(&mut self.hasher_type, "sha256".to_string(), config.hasher_type);
        if self.include_loci.is_none() {
            self.include_loci = config.include_loci;
        }
        if self.exclude_loci.is_none() {
            self.exclude_loci = config.exclude_loci;
        }
        if self.genes_list.is_none() {
            self.genes_list = config.genes_list;
        }

        // Flags (only enable, never disable from config)
        if !self.cds_input && config.cds_input == Some(true) {
            self.cds_input = true;
        }
        if !self.no_inferred && config.no_inferred == Some(true) {
            self.no_inferred = true;
        }
        if !self.no_cleanup && config.no_cleanup == Some(true) {
            self.no_cleanup = true;
        }
        if !self.dry_run && config.dry_run == Some(true) {
            self.dry_run = true;
        }

        self
    }

    /// Load configuration and merge with CLI args
    pub fn with_config_file(self, config_path: &str) -> Result<Self, String> {
        let config = Config::from_file(config_path)?;
        Ok(self.merge_with_config(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argh::FromArgs;

    fn parse(args: &[&str]) -> Args {
        Args::from_args(&["cgcall"], args).unwrap()
    }

    #[test]
    fn test_cli_values_take_precedence() {
        let mut config = Config::new();
        config.bsr = Some(0.7);
        config.schema_directory = Some("from_config".to_string());
        config.clustering_mode = Some("full".to_string());

        let args = parse(&["--bsr", "0.5", "--schema-directory", "from_cli"]).merge_with_config(config);
        assert_eq!(args.bsr, 0.5);
        assert_eq!(args.schema_directory.as_deref(), Some("from_cli"));
        assert_eq!(args.clustering_mode, "full");
    }

    #[test]
    fn test_config_fills_defaults_and_flags() {
        let mut config = Config::new();
        config.minimum_length = Some(0);
        config.no_cleanup = Some(true);
        config.cpu = Some(4);

        let args = parse(&[]).merge_with_config(config);
        assert_eq!(args.minimum_length, 0);
        assert!(args.no_cleanup);
        assert!(!args.no_inferred);
        assert_eq!(args.cpu, Some(4));
        assert_eq!(args.hasher_type, "sha256");
    }
}
