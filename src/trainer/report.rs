use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Outcome of a run: per-epoch losses, the best validation epoch and the
/// final test loss.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub train_losses: Vec<f64>,
    pub valid_losses: Vec<f64>,
    pub best_loss: f64,
    /// 1-based; 0 when no epoch completed.
    pub best_epoch: usize,
    pub test_loss: f64,
    pub interrupted: bool,
}

impl TrainingReport {
    pub fn summary_line(&self) -> String {
        format!(
            "Best loss {:.4} | Best ppl {:.4} | Epoch {} | Test loss {:.4} | Test ppl {:.4}",
            self.best_loss,
            self.best_loss.exp(),
            self.best_epoch,
            self.test_loss,
            self.test_loss.exp()
        )
    }

    /// `train,valid` header followed by one row per completed epoch.
    pub fn loss_history_csv(&self) -> String {
        let mut csv = String::from("train,valid\n");
        for (train, valid) in self.train_losses.iter().zip(&self.valid_losses) {
            csv.push_str(&format!("{train},{valid}\n"));
        }
        csv
    }

    pub fn write_loss_history(&self, path: &Path) -> Result<()> {
        fs::write(path, self.loss_history_csv())
            .with_context(|| format!("failed to write loss history {}", path.display()))
    }

    pub fn write_summary(&self, path: &Path) -> Result<()> {
        fs::write(path, format!("{}\n", self.summary_line()))
            .with_context(|| format!("failed to write summary {}", path.display()))
    }
}
