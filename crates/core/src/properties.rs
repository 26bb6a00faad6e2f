use std::time::Duration;

/// A preference-valued field, as used throughout [`SelectionProperties`].
/// `Require`/`Prohibit` are hard constraints; `Prefer`/`Avoid` influence
/// candidate ordering only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preference {
    Prohibit,
    Avoid,
    NoPreference,
    Prefer,
    Require,
}

impl Default for Preference {
    fn default() -> Self {
        Preference::NoPreference
    }
}

impl Preference {
    pub fn is_hard_constraint(&self) -> bool {
        matches!(self, Preference::Require | Preference::Prohibit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipathMode {
    Disabled,
    Active,
    Passive,
}

impl Default for MultipathMode {
    fn default() -> Self {
        MultipathMode::Disabled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Bidirectional,
    UnidirectionalSend,
    UnidirectionalReceive,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Bidirectional
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityProfile {
    Default,
    Scavenger,
    LowLatencyInteractive,
    LowLatencyNonInteractive,
    ConstantRateStreaming,
    CapacitySeeking,
}

impl Default for CapacityProfile {
    fn default() -> Self {
        CapacityProfile::Default
    }
}

/// Default stagger between successive candidate attempts in the Racing
/// Engine, matching the source's Happy-Eyeballs-style pacing.
pub const DEFAULT_CANDIDATE_STAGGER: Duration = Duration::from_millis(250);

/// Default bound on the overall establishment race.
pub const DEFAULT_CONN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default idle keep-alive interval enforced by the transport driver when
/// the underlying stack supports it. Zero means disabled.
pub const DEFAULT_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(0);

/// Default cap on not-yet-consumed accepted connections held by a
/// Listener before the accept loop pauses.
pub const DEFAULT_NEW_CONNECTION_LIMIT: usize = 16;

/// A fixed record of preference-valued fields plus a few enumerations
/// that together steer the Candidate Tree Builder. Field defaults match
/// `NoPreference`/`Disabled`/`Default` so an unconfigured
/// `SelectionProperties` constrains nothing.
#[derive(Debug, Clone)]
pub struct SelectionProperties {
    pub reliability: Preference,
    pub preserve_msg_boundaries: Preference,
    pub preserve_order: Preference,
    pub congestion_control: Preference,
    pub zero_rtt: Preference,
    pub multipath: MultipathMode,
    pub direction: Direction,
    pub capacity_profile: CapacityProfile,
    pub conn_timeout: Duration,
    pub keep_alive_timeout: Duration,
    pub candidate_stagger: Duration,
}

impl Default for SelectionProperties {
    fn default() -> Self {
        SelectionProperties {
            reliability: Preference::default(),
            preserve_msg_boundaries: Preference::default(),
            preserve_order: Preference::default(),
            congestion_control: Preference::default(),
            zero_rtt: Preference::default(),
            multipath: MultipathMode::default(),
            direction: Direction::default(),
            capacity_profile: CapacityProfile::default(),
            conn_timeout: DEFAULT_CONN_TIMEOUT,
            keep_alive_timeout: DEFAULT_KEEP_ALIVE_TIMEOUT,
            candidate_stagger: DEFAULT_CANDIDATE_STAGGER,
        }
    }
}

impl SelectionProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every field whose preference is `Require` or `Prohibit`, paired
    /// with the preference, for feasibility checks in the Candidate Tree
    /// Builder.
    pub fn hard_constraints(&self) -> Vec<(&'static str, Preference)> {
        [
            ("reliability", self.reliability),
            ("preserve_msg_boundaries", self.preserve_msg_boundaries),
            ("preserve_order", self.preserve_order),
            ("congestion_control", self.congestion_control),
            ("zero_rtt", self.zero_rtt),
        ]
        .into_iter()
        .filter(|(_, p)| p.is_hard_constraint())
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_properties_have_no_hard_constraints() {
        let props = SelectionProperties::default();
        assert!(props.hard_constraints().is_empty());
    }

    #[test]
    fn require_and_prohibit_are_hard_constraints() {
        assert!(Preference::Require.is_hard_constraint());
        assert!(Preference::Prohibit.is_hard_constraint());
        assert!(!Preference::Prefer.is_hard_constraint());
        assert!(!Preference::Avoid.is_hard_constraint());
        assert!(!Preference::NoPreference.is_hard_constraint());
    }
}
