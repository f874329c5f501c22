//! Temporal averaging: thin out the measurement stream before it reaches
//! the producer sink.

use crate::{
    consumer::{MeasurementConsumer, SharedConsumer},
    device::DeviceRecord,
    measurement::Measurement,
    store::MeasurementStore,
};

/// Per device averaging state.
#[derive(Debug)]
struct AveragingState {
    serial_number: u32,
    /// Elapsed device time not yet accounted for by a completed window.
    remainder: u64,
    /// Timestamp of the most recent sample.
    last_time: u32,
    last_time_valid: bool,
    /// Whether the current packet completed an averaging window.
    window_reached: bool,
    /// Window length in device time units: milliseconds for emeters,
    /// seconds for inverters. Zero passes everything through.
    window: u64,
}

/// Forwards measurements only when a device's averaging window has elapsed.
///
/// The sample series already holds the history, so "averaging" here is pure
/// flow control: when the window completes, downstream consumers read the
/// series mean. Devices are tracked independently by serial number; emeter
/// windows count milliseconds, inverter windows seconds.
pub struct AveragingProcessor {
    obis_window_ms: u64,
    speedwire_window_ms: u64,
    states: Vec<AveragingState>,
    consumers: Vec<SharedConsumer>,
}

impl AveragingProcessor {
    /// Create a processor with the given window lengths in milliseconds.
    /// Zero disables averaging for the respective device kind.
    pub fn new(obis_window_ms: u64, speedwire_window_ms: u64) -> Self {
        Self {
            obis_window_ms,
            speedwire_window_ms,
            states: Vec::new(),
            consumers: Vec::new(),
        }
    }

    /// Register a downstream consumer.
    pub fn add_consumer(&mut self, consumer: SharedConsumer) {
        self.consumers.push(consumer);
    }

    /// Remainder of the averaging window for a device, for inspection.
    pub fn remainder(&self, serial_number: u32) -> Option<u64> {
        self.states
            .iter()
            .find(|s| s.serial_number == serial_number)
            .map(|s| s.remainder)
    }

    fn state_index(&mut self, device: &DeviceRecord) -> usize {
        if let Some(index) = self
            .states
            .iter()
            .position(|s| s.serial_number == device.address.serial_number)
        {
            return index;
        }

        // Inverter timestamps count seconds, so the configured window in
        // milliseconds is scaled down for them.
        let window = if device.device_class.is_inverter() {
            self.speedwire_window_ms / 1000
        } else {
            self.obis_window_ms
        };

        self.states.push(AveragingState {
            serial_number: device.address.serial_number,
            remainder: 0,
            last_time: 0,
            last_time_valid: false,
            window_reached: false,
            window,
        });

        self.states.len() - 1
    }

    /// Run the window state machine for one sample timestamp. Returns `true`
    /// when the sample should pass through.
    fn process(&mut self, device: &DeviceRecord, time: u32) -> bool {
        let index = self.state_index(device);
        let state = &mut self.states[index];

        if state.window == 0 {
            state.window_reached = true;
        } else if !state.last_time_valid {
            // The very first sample of a device never passes: there is no
            // window to have completed yet.
            state.window_reached = false;
        } else if time != state.last_time {
            state.remainder += u64::from(time.wrapping_sub(state.last_time));
            state.window_reached = state.remainder >= state.window;
            if state.window_reached {
                state.remainder %= state.window;
            }
        }

        state.last_time = time;
        state.last_time_valid = true;

        state.window_reached
    }

    fn window_reached(&self, serial_number: u32) -> bool {
        self.states
            .iter()
            .find(|s| s.serial_number == serial_number)
            .is_some_and(|s| s.window_reached)
    }
}

impl MeasurementConsumer for AveragingProcessor {
    fn consume(&mut self, device: &DeviceRecord, measurement: &Measurement) {
        let Some(sample) = measurement.series.newest() else {
            return;
        };

        if self.process(device, sample.time) {
            for consumer in &self.consumers {
                consumer.borrow_mut().consume(device, measurement);
            }
        }
    }

    fn end_of_batch(&mut self, device: &DeviceRecord, store: &MeasurementStore, time: u32) {
        if self.window_reached(device.address.serial_number) {
            for consumer in &self.consumers {
                consumer.borrow_mut().end_of_batch(device, store, time);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::{DeviceAddress, DeviceClass},
        measurement::{MeasurementKey, MeasurementType, Wire},
    };
    use std::{cell::RefCell, net::Ipv4Addr, rc::Rc};

    struct Count {
        samples: u32,
        batches: u32,
    }

    impl MeasurementConsumer for Count {
        fn consume(&mut self, _device: &DeviceRecord, _measurement: &Measurement) {
            self.samples += 1;
        }

        fn end_of_batch(&mut self, _device: &DeviceRecord, _store: &MeasurementStore, _time: u32) {
            self.batches += 1;
        }
    }

    fn emeter_device(serial: u32) -> DeviceRecord {
        DeviceRecord {
            address: DeviceAddress::new(0x015d, serial),
            device_class: DeviceClass::Emeter,
            device_type: "EMETER-20".into(),
            peer_ip: Ipv4Addr::new(192, 168, 182, 10),
            interface_ip: Ipv4Addr::new(192, 168, 182, 2),
        }
    }

    fn measurement_at(time: u32) -> Measurement {
        let mut m = Measurement::new(
            MeasurementType::emeter_positive_active_power(),
            Wire::Total,
            MeasurementKey::Derived,
            "Pin",
            8,
        );
        m.append_raw(870.0, time);
        m
    }

    fn feed(processor: &mut AveragingProcessor, device: &DeviceRecord, time: u32) {
        let store = MeasurementStore::new();
        processor.consume(device, &measurement_at(time));
        processor.end_of_batch(device, &store, time);
    }

    #[test]
    fn window_boundary() {
        let counter = Rc::new(RefCell::new(Count {
            samples: 0,
            batches: 0,
        }));
        let mut processor = AveragingProcessor::new(60_000, 60_000);
        processor.add_consumer(counter.clone());

        let device = emeter_device(1);

        // Window of 60 s: nothing passes until 61 s of device time elapsed.
        for time in [0, 20_000, 40_000] {
            feed(&mut processor, &device, time);
            assert_eq!(counter.borrow().samples, 0, "at {}", time);
        }

        feed(&mut processor, &device, 61_000);
        assert_eq!(counter.borrow().samples, 1);
        assert_eq!(counter.borrow().batches, 1);
        assert_eq!(processor.remainder(1), Some(1_000));
    }

    #[test]
    fn zero_window_passes_everything() {
        let counter = Rc::new(RefCell::new(Count {
            samples: 0,
            batches: 0,
        }));
        let mut processor = AveragingProcessor::new(0, 0);
        processor.add_consumer(counter.clone());

        let device = emeter_device(1);

        for time in [0, 1, 2] {
            feed(&mut processor, &device, time);
        }

        assert_eq!(counter.borrow().samples, 3);
        assert_eq!(counter.borrow().batches, 3);
    }

    #[test]
    fn devices_tracked_independently() {
        let counter = Rc::new(RefCell::new(Count {
            samples: 0,
            batches: 0,
        }));
        let mut processor = AveragingProcessor::new(10_000, 10_000);
        processor.add_consumer(counter.clone());

        let a = emeter_device(1);
        let b = emeter_device(2);

        feed(&mut processor, &a, 0);
        feed(&mut processor, &b, 0);
        feed(&mut processor, &a, 11_000);
        assert_eq!(counter.borrow().samples, 1);

        // Device b has not completed a window yet.
        feed(&mut processor, &b, 5_000);
        assert_eq!(counter.borrow().samples, 1);

        feed(&mut processor, &b, 11_000);
        assert_eq!(counter.borrow().samples, 2);
    }

    #[test]
    fn repeated_timestamp_does_not_advance_window() {
        let mut processor = AveragingProcessor::new(10_000, 10_000);
        let device = emeter_device(1);

        assert!(!processor.process(&device, 1000));
        assert!(!processor.process(&device, 6000));
        // Same packet timestamp again, e.g. further elements of the packet.
        assert!(!processor.process(&device, 6000));
        assert!(processor.process(&device, 12_000));
        assert_eq!(processor.remainder(1), Some(1_000));
    }
}
