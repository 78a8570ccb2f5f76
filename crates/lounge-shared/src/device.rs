//! Device fingerprints used for device-level bans.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

const FINGERPRINT_LEN: usize = 32;

/// Client characteristics that make up a fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceComponents {
    pub user_agent: String,
    pub screen: String,
    pub timezone_offset_minutes: i32,
    pub language: String,
}

impl DeviceComponents {
    /// Base64 of the `|`-joined components, truncated to 32 characters.
    ///
    /// Cheap to spoof, so a device ban only slows a determined user down.
    pub fn fingerprint(&self) -> String {
        let joined = [
            self.user_agent.as_str(),
            self.screen.as_str(),
            &self.timezone_offset_minutes.to_string(),
            self.language.as_str(),
        ]
        .join("|");
        let mut encoded = STANDARD.encode(joined.as_bytes());
        encoded.truncate(FINGERPRINT_LEN);
        encoded
    }
}
