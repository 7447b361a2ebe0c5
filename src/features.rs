//! Runtime feature synchronisation.
//!
//! [`FeatureSync`] keeps two copies of every feature: the state the caller
//! wants and the state last written to the device. [`FeatureSync::sync`]
//! pushes only the fields that differ, so it can be called every frame.

use crate::error::{CaptureError, Result};
use crate::traits::{ControlSurface, FeatureId, FeatureInfo, FeatureMode};

/// Writable state of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureState {
    /// Power state.
    pub on: bool,
    /// Control mode.
    pub mode: FeatureMode,
    /// Scalar value. Unused for white balance.
    pub value: u32,
    /// `(B/U, R/V)` pair. Only used for white balance.
    pub white_balance: (u32, u32),
}

impl FeatureState {
    fn from_info(info: &FeatureInfo) -> Self {
        Self {
            on: info.is_on,
            mode: info.current_mode,
            value: info.value,
            white_balance: info.white_balance.unwrap_or_default(),
        }
    }
}

/// One device feature with desired and applied state.
#[derive(Debug, Clone)]
pub struct Feature {
    id: FeatureId,
    on_off_capable: bool,
    modes: Vec<FeatureMode>,
    min: u32,
    max: u32,
    desired: FeatureState,
    applied: FeatureState,
}

impl Feature {
    fn new(info: &FeatureInfo) -> Self {
        let state = FeatureState::from_info(info);
        Self {
            id: info.id,
            on_off_capable: info.on_off_capable,
            modes: info.modes.clone(),
            min: info.min,
            max: info.max,
            desired: state,
            applied: state,
        }
    }

    /// Feature identifier.
    pub const fn id(&self) -> FeatureId {
        self.id
    }

    /// Human-readable name.
    pub const fn name(&self) -> &'static str {
        self.id.name()
    }

    /// Whether the feature can be switched off.
    pub const fn is_on_off_capable(&self) -> bool {
        self.on_off_capable
    }

    /// Modes the device accepts.
    pub fn modes(&self) -> &[FeatureMode] {
        &self.modes
    }

    /// Accepted value range, inclusive.
    pub const fn range(&self) -> (u32, u32) {
        (self.min, self.max)
    }

    /// State the caller asked for.
    pub const fn desired(&self) -> &FeatureState {
        &self.desired
    }

    /// State last written to the device.
    pub const fn applied(&self) -> &FeatureState {
        &self.applied
    }

    /// Whether a sync would write anything.
    pub fn is_dirty(&self) -> bool {
        self.desired != self.applied
    }

    /// Whether the value is owned by the device. True in auto mode.
    pub fn is_value_read_only(&self) -> bool {
        self.desired.mode == FeatureMode::Auto
    }

    /// Request a power state.
    pub fn set_on(&mut self, on: bool) -> Result<()> {
        if !self.on_off_capable && !on {
            return Err(self.error("cannot be switched off"));
        }
        self.desired.on = on;
        Ok(())
    }

    /// Request a control mode the device advertises.
    pub fn set_mode(&mut self, mode: FeatureMode) -> Result<()> {
        if !self.modes.contains(&mode) {
            return Err(self.error(&format!("mode {mode} not supported")));
        }
        self.desired.mode = mode;
        Ok(())
    }

    /// Request a value, clamped into the accepted range.
    pub fn set_value(&mut self, value: u32) {
        self.desired.value = self.clamp(value);
    }

    /// Request a white balance pair, each component clamped.
    pub fn set_white_balance(&mut self, blue_u: u32, red_v: u32) -> Result<()> {
        if self.id != FeatureId::WhiteBalance {
            return Err(self.error("has no white balance components"));
        }
        self.desired.white_balance = (self.clamp(blue_u), self.clamp(red_v));
        Ok(())
    }

    fn clamp(&self, value: u32) -> u32 {
        if self.min > self.max {
            return value;
        }
        value.clamp(self.min, self.max)
    }

    fn error(&self, message: &str) -> CaptureError {
        CaptureError::Feature {
            feature: self.id,
            message: message.to_owned(),
        }
    }

    /// Write the differing fields: power, then mode, then value.
    /// Stops at the first failure, leaving that field's applied state untouched.
    fn push<C: ControlSurface>(&mut self, controls: &mut C) -> Result<usize> {
        let id = self.id;
        let wrap = |err: CaptureError| match err {
            err @ CaptureError::Feature { .. } => err,
            other => CaptureError::Feature {
                feature: id,
                message: other.to_string(),
            },
        };
        let mut pushed = 0;

        if self.desired.on != self.applied.on {
            controls.set_power(id, self.desired.on).map_err(wrap)?;
            self.applied.on = self.desired.on;
            pushed += 1;
        }

        if self.desired.mode != self.applied.mode {
            controls.set_mode(id, self.desired.mode).map_err(wrap)?;
            self.applied.mode = self.desired.mode;
            pushed += 1;
        }

        if id == FeatureId::WhiteBalance {
            if self.desired.white_balance != self.applied.white_balance {
                let (blue_u, red_v) = self.desired.white_balance;
                controls.set_white_balance(blue_u, red_v).map_err(wrap)?;
                self.applied.white_balance = self.desired.white_balance;
                pushed += 1;
            }
        } else if self.desired.value != self.applied.value {
            controls.set_value(id, self.desired.value).map_err(wrap)?;
            self.applied.value = self.desired.value;
            pushed += 1;
        }

        Ok(pushed)
    }
}

/// Outcome of one [`FeatureSync::sync`] pass.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Number of device writes that succeeded.
    pub pushed: usize,
    /// Features whose writes failed. Each failed feature stays dirty.
    pub errors: Vec<CaptureError>,
}

impl SyncReport {
    /// Whether every write succeeded.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Feature collection bound to a device's control surface.
pub struct FeatureSync<C: ControlSurface> {
    controls: C,
    features: Vec<Feature>,
}

impl<C: ControlSurface> FeatureSync<C> {
    /// Snapshot every advertised feature. Desired and applied start equal.
    pub fn new(mut controls: C) -> Result<Self> {
        let features = snapshot(&mut controls)?;
        Ok(Self { controls, features })
    }

    /// Rebind to another device, replacing the collection wholesale.
    pub fn attach(&mut self, mut controls: C) -> Result<()> {
        self.features = snapshot(&mut controls)?;
        self.controls = controls;
        Ok(())
    }

    /// Re-read the device, discarding unsynced requests.
    pub fn reload(&mut self) -> Result<()> {
        self.features = snapshot(&mut self.controls)?;
        Ok(())
    }

    /// Every feature, in device order.
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Look a feature up.
    pub fn feature(&self, id: FeatureId) -> Option<&Feature> {
        self.features.iter().find(|feature| feature.id == id)
    }

    /// Look a feature up for editing.
    pub fn feature_mut(&mut self, id: FeatureId) -> Option<&mut Feature> {
        self.features.iter_mut().find(|feature| feature.id == id)
    }

    /// Whether any feature has unsynced changes.
    pub fn is_dirty(&self) -> bool {
        self.features.iter().any(Feature::is_dirty)
    }

    /// Push every differing field to the device. Failures are collected
    /// per feature and never abort the pass.
    pub fn sync(&mut self) -> SyncReport {
        let mut report = SyncReport::default();
        for feature in &mut self.features {
            match feature.push(&mut self.controls) {
                Ok(pushed) => report.pushed += pushed,
                Err(err) => {
                    log::warn!("failed to update {}: {err}", feature.name());
                    report.errors.push(err);
                }
            }
        }
        if report.pushed > 0 {
            log::debug!("pushed {} feature write(s)", report.pushed);
        }
        report
    }
}

fn snapshot<C: ControlSurface>(controls: &mut C) -> Result<Vec<Feature>> {
    let features: Vec<Feature> = controls.features()?.iter().map(Feature::new).collect();
    log::debug!("device advertises {} feature(s)", features.len());
    Ok(features)
}
