#![doc = "BlueChat Harness\n\nProvides a deterministic in-memory radio transport so the runtime and\napplications can be exercised without Bluetooth hardware."]

pub mod mock_radio;

pub use mock_radio::{MockRadio, MockRadioConfig, MockRadioStats, RadioCall};
