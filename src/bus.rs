//! Typed AXI4-Stream port bundle
//!
//! Ports are bound once by naming convention (`{prefix}_tvalid`,
//! `{prefix}_tready`, `{prefix}_tdata`, `{prefix}_tlast`, `{prefix}_tuser`)
//! and then passed around as a value.

use crate::beat::Beat;
use crate::sim::{Logic, SimHandle, Signal};

/// The five signals of one AXI4-Stream video interface
#[derive(Debug, Clone)]
pub struct AxisPorts {
    /// Interface prefix, e.g. `s_axis_video`
    pub prefix: String,
    /// `tvalid`, driven by the producer
    pub valid: Signal,
    /// `tready`, driven by the consumer
    pub ready: Signal,
    /// `tdata`
    pub data: Signal,
    /// `tlast`, end of line
    pub last: Signal,
    /// `tuser`, start of frame
    pub user: Signal,
}

impl AxisPorts {
    /// Create the interface signals on the simulator.
    pub fn new(handle: &SimHandle, prefix: &str, data_width: u32) -> Self {
        Self {
            prefix: prefix.to_string(),
            valid: handle.signal(format!("{}_tvalid", prefix), 1),
            ready: handle.signal(format!("{}_tready", prefix), 1),
            data: handle.signal(format!("{}_tdata", prefix), data_width),
            last: handle.signal(format!("{}_tlast", prefix), 1),
            user: handle.signal(format!("{}_tuser", prefix), 1),
        }
    }

    /// Drive all producer-side signals to known idle values.
    pub fn drive_idle(&self) {
        self.valid.set_bool(false);
        self.data.set(0);
        self.last.set_bool(false);
        self.user.set_bool(false);
    }

    /// Present a beat with `tvalid` high.
    pub fn drive(&self, beat: &Beat) {
        self.valid.set_bool(true);
        self.data.set(beat.data);
        self.user.set_bool(beat.sof);
        self.last.set_bool(beat.eol);
    }

    /// Snapshot all five signals.
    pub fn sample(&self) -> BusSample {
        BusSample {
            valid: self.valid.get(),
            ready: self.ready.get(),
            data: self.data.get(),
            last: self.last.get(),
            user: self.user.get(),
        }
    }
}

/// Values of an [`AxisPorts`] bundle at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusSample {
    /// `tvalid`
    pub valid: Logic,
    /// `tready`
    pub ready: Logic,
    /// `tdata`
    pub data: Logic,
    /// `tlast`
    pub last: Logic,
    /// `tuser`
    pub user: Logic,
}

impl BusSample {
    /// First signal (in `tvalid, tready, tdata, tlast, tuser` order) holding X or Z
    pub fn first_unresolved(&self) -> Option<(&'static str, Logic)> {
        [
            ("tvalid", self.valid),
            ("tready", self.ready),
            ("tdata", self.data),
            ("tlast", self.last),
            ("tuser", self.user),
        ]
        .into_iter()
        .find(|(_, value)| !value.is_resolved())
    }

    /// `tvalid` resolved high
    pub fn valid(&self) -> bool {
        self.valid == Logic::Bits(1)
    }

    /// `tready` resolved high
    pub fn ready(&self) -> bool {
        self.ready == Logic::Bits(1)
    }

    /// A transfer happens at this edge (`tvalid && tready`).
    pub fn fire(&self) -> bool {
        self.valid() && self.ready()
    }

    /// Producer is waiting (`tvalid && !tready`).
    pub fn stalled(&self) -> bool {
        self.valid() && !self.ready()
    }

    /// Payload as a beat, if data and markers are all resolved
    pub fn beat(&self) -> Option<Beat> {
        Some(Beat {
            data: self.data.bits()?,
            sof: self.user.bits()? != 0,
            eol: self.last.bits()? != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimConfig, Simulator};

    #[test]
    fn test_port_names_follow_prefix() {
        let sim = Simulator::new(SimConfig::default());
        let ports = AxisPorts::new(&sim.handle(), "m_axis_video", 24);
        assert_eq!(ports.valid.name(), "m_axis_video_tvalid");
        assert_eq!(ports.ready.name(), "m_axis_video_tready");
        assert_eq!(ports.data.width(), 24);
        assert_eq!(ports.user.name(), "m_axis_video_tuser");
    }

    #[test]
    fn test_sample_reports_unresolved() {
        let mut sim = Simulator::new(SimConfig::default());
        let ports = AxisPorts::new(&sim.handle(), "s", 8);
        let sample = ports.sample();
        assert_eq!(sample.first_unresolved(), Some(("tvalid", Logic::Unknown)));
        assert_eq!(sample.beat(), None);

        let driven = ports.clone();
        sim.run(async move {
            driven.drive(&Beat {
                data: 0xAB,
                sof: true,
                eol: false,
            });
            driven.ready.set_bool(false);
        })
        .unwrap();

        let sample = ports.sample();
        assert_eq!(sample.first_unresolved(), None);
        assert!(sample.stalled());
        assert!(!sample.fire());
        assert_eq!(
            sample.beat(),
            Some(Beat {
                data: 0xAB,
                sof: true,
                eol: false
            })
        );
    }
}
