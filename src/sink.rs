//! Hand-off point for measured profiles (plots, dumps, debugging).

use tracing::debug;

use crate::profile::Profile;

/// Receives each measured profile together with the noise floor it was
/// measured against.
pub trait ProfileSink {
    fn record(&mut self, label: &str, profile: &Profile, onesigma: f64);
}

/// An owned copy of one measured profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileSnapshot {
    pub label: String,
    pub profile: Profile,
    pub onesigma: f64,
}

impl ProfileSink for Vec<ProfileSnapshot> {
    fn record(&mut self, label: &str, profile: &Profile, onesigma: f64) {
        self.push(ProfileSnapshot {
            label: label.to_string(),
            profile: profile.clone(),
            onesigma,
        });
    }
}

/// Writes the filled bins of every profile to the `tracing` DEBUG level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProfileSink for TracingSink {
    fn record(&mut self, label: &str, profile: &Profile, onesigma: f64) {
        debug!("{}: profile against onesigma = {:.4}", label, onesigma);
        for (r, v, e) in profile.filled() {
            debug!("  r = {:7.2}  value = {:12.5}  err = {:10.5}", r, v, e);
        }
    }
}
