//! Fixed hyperparameters for domain MLM fine-tuning.

use serde::{Deserialize, Serialize};

/// Pretrained checkpoint every run starts from.
pub const MODEL_NAME_OR_PATH: &str = "bert-base-uncased";

/// Hyperparameters handed to the trainer. These are part of the run definition and are not
/// read from configuration, so two runs with the same `(modelType, baseline)` are comparable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub model_name_or_path: String,
    /// Per-device batch size, used for both training and evaluation.
    pub batch_size: u32,
    pub grad_accum_steps: u32,
    pub learning_rate: f64,
    pub warmup_steps: u32,
    pub adam_epsilon: f64,
    pub block_size: u32,
    pub num_epochs: f64,
    pub seed: u64,
    pub save_steps: u32,
    pub logging_steps: u32,
    pub save_total_limit: u32,
    pub mlm_probability: f64,
    pub fp16_opt_level: String,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            model_name_or_path: MODEL_NAME_OR_PATH.to_string(),
            batch_size: 16,
            grad_accum_steps: 8,
            learning_rate: 5e-5,
            warmup_steps: 0,
            adam_epsilon: 1e-6,
            block_size: 512,
            num_epochs: 6.0,
            seed: 0,
            save_steps: 500,
            logging_steps: 500,
            save_total_limit: 1,
            mlm_probability: 0.15,
            fp16_opt_level: "O2".to_string(),
        }
    }
}

/// Presence flags that are always passed.
pub const ALWAYS_ON_FLAGS: [&str; 7] = [
    "--do_train",
    "--do_eval",
    "--do_lower_case",
    "--mlm",
    "--evaluate_during_training",
    "--overwrite_output_dir",
    "--fp16",
];

impl Hyperparameters {
    /// `(flag, value)` pairs in the order the trainer documents them.
    pub fn flag_values(&self) -> Vec<(&'static str, String)> {
        vec![
            ("--model_name_or_path", self.model_name_or_path.clone()),
            ("--per_gpu_train_batch_size", self.batch_size.to_string()),
            ("--per_gpu_eval_batch_size", self.batch_size.to_string()),
            (
                "--gradient_accumulation_steps",
                self.grad_accum_steps.to_string(),
            ),
            ("--mlm_probability", self.mlm_probability.to_string()),
            ("--block_size", self.block_size.to_string()),
            ("--learning_rate", format!("{:e}", self.learning_rate)),
            ("--warmup_steps", self.warmup_steps.to_string()),
            ("--adam_epsilon", format!("{:e}", self.adam_epsilon)),
            ("--seed", self.seed.to_string()),
            ("--save_steps", self.save_steps.to_string()),
            ("--logging_steps", self.logging_steps.to_string()),
            ("--save_total_limit", self.save_total_limit.to_string()),
            ("--num_train_epochs", format!("{:?}", self.num_epochs)),
            ("--fp16_opt_level", self.fp16_opt_level.clone()),
        ]
    }
}
