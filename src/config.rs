use crate::flow_tracker::FlowTracker;
use crate::model::{ModelFactory, TrackingModel};
use crate::optical_flow::LkParams;

/// Tracking settings shared by every subcommand
#[derive(Clone, Debug, clap::Args)]
pub struct Config {
    /// Frames per model invocation. Defaults to twice the model step (16).
    /// A small window such as 5 gives a first result after 4 frames.
    #[clap(long)]
    pub window_size: Option<usize>,

    /// Native processing stride of the tracking model
    #[clap(long, default_value = "8")]
    pub model_step: usize,

    #[clap(long, default_value = "3")]
    pub lk_levels: usize,

    #[clap(long, default_value = "7")]
    pub lk_win_size: usize,

    #[clap(long, default_value = "8")]
    pub lk_iters: usize,

    /// Stop iterating once an update moves less than this many pixels
    #[clap(long, default_value = "0.1")]
    pub lk_term: f64,

    /// Reject patches whose gradient matrix has a smaller eigenvalue
    #[clap(long, default_value = "1e-4")]
    pub lk_min_eig: f64,
}

impl Default for Config {
    fn default() -> Self {
        let lk = LkParams::default();
        Self {
            window_size: None,
            model_step: 8,
            lk_levels: lk.levels,
            lk_win_size: lk.win_size,
            lk_iters: lk.iters,
            lk_term: lk.term,
            lk_min_eig: lk.min_eig,
        }
    }
}

impl Config {
    pub fn lk_params(&self) -> LkParams {
        LkParams {
            levels: self.lk_levels,
            iters: self.lk_iters,
            win_size: self.lk_win_size,
            term: self.lk_term,
            min_eig: self.lk_min_eig,
        }
    }

    /// Window capacity a session gets with this configuration
    pub fn window_capacity(&self) -> usize {
        self.window_size.unwrap_or(2 * self.model_step)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window_capacity() == 0 {
            anyhow::bail!("window size must be at least one frame");
        }
        if self.lk_win_size < 3 || self.lk_win_size % 2 == 0 {
            anyhow::bail!("lk window size must be odd and at least 3, got {}", self.lk_win_size);
        }
        if self.lk_iters == 0 {
            anyhow::bail!("lk iterations must be positive");
        }
        Ok(())
    }

    /// Factory for the optical flow model every new session gets
    pub fn model_factory(&self) -> ModelFactory {
        let params = self.lk_params();
        let step = self.model_step;
        Box::new(move || Box::new(FlowTracker::new(params, step)) as Box<dyn TrackingModel>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_capacity() {
        let mut config = Config::default();
        assert_eq!(config.window_capacity(), 16);
        config.model_step = 3;
        assert_eq!(config.window_capacity(), 6);
        config.window_size = Some(5);
        assert_eq!(config.window_capacity(), 5);
        config.validate().unwrap();

        config.window_size = Some(0);
        assert!(config.validate().is_err());
    }

    #[derive(clap::Parser)]
    struct Cli {
        #[clap(flatten)]
        config: Config,
    }

    #[test]
    fn test_command_line() {
        use clap::Parser;

        let cli = Cli::try_parse_from(["keypoint-track"]).unwrap();
        assert_eq!(cli.config.window_capacity(), 16);
        assert_eq!(cli.config.lk_params(), Config::default().lk_params());

        let cli = Cli::try_parse_from(["keypoint-track", "--window-size", "5"]).unwrap();
        assert_eq!(cli.config.window_capacity(), 5);
        assert!(cli.config.validate().is_ok());
    }

    #[test]
    fn test_factory_uses_model_step() {
        let config = Config {
            model_step: 4,
            ..Default::default()
        };
        assert_eq!((config.model_factory())().stride(), 4);
        assert_eq!(config.lk_params(), LkParams::default());
    }
}
