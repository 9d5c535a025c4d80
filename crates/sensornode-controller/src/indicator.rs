//! Status indicator collaborator.

/// A status LED or equivalent, flashed after each publish attempt when
/// `SensorSettings::blink_led` is set.
pub trait Indicator: Send {
    fn signal(&mut self, success: bool);
}

/// Indicator of a node without one.
pub struct NoIndicator;

impl Indicator for NoIndicator {
    fn signal(&mut self, _success: bool) {}
}
