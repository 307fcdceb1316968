pub struct DefaultsConfig {
    pub num_best_sequences: usize,
    pub epsilon: f64,
    pub confs_per_batch: usize,
    pub margin: f64,
    pub require_converged_top: bool,
    pub cache_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            num_best_sequences: 5,
            epsilon: 0.68,
            confs_per_batch: 8,
            margin: 0.0,
            require_converged_top: true,
            cache_dir: ".bbkstar-cache".to_string(),
        }
    }
}
