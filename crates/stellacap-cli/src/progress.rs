use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};
use stellacap_core::progress::{ProgressReporter, ProgressStage};

/// Progress bars for batch combination. Stages without a frame count
/// (a whole master, writing) only set the label; counted stages inside them
/// get a bar.
pub struct BarReporter {
    label: Mutex<String>,
    bar: Mutex<Option<ProgressBar>>,
}

impl BarReporter {
    pub fn new() -> Self {
        Self {
            label: Mutex::new(String::new()),
            bar: Mutex::new(None),
        }
    }
}

impl ProgressReporter for BarReporter {
    fn begin_stage(&self, stage: ProgressStage, total_items: Option<usize>) {
        let Some(total) = total_items else {
            *self.label.lock().unwrap() = stage.to_string();
            return;
        };
        let label = self.label.lock().unwrap().clone();
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar().template("{msg:40} [{bar:40}] {pos}/{len}") {
            pb.set_style(style.progress_chars("=> "));
        }
        pb.set_message(format!("{label}: {stage}"));
        *self.bar.lock().unwrap() = Some(pb);
    }

    fn advance(&self, items_done: usize) {
        if let Some(pb) = self.bar.lock().unwrap().as_ref() {
            pb.set_position(items_done as u64);
        }
    }

    fn finish_stage(&self) {
        if let Some(pb) = self.bar.lock().unwrap().take() {
            pb.finish();
        }
    }
}
