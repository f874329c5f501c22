//! Values computed from combinations of received measurements: signed grid
//! power, DC/AC totals, conversion loss and efficiency, household
//! consumption and the monetary tariffs on top.

use crate::{
    config::TariffRates,
    consumer::{MeasurementConsumer, Producer},
    device::DeviceRecord,
    measurement::{Measurement, MeasurementType, Wire},
    obis, registers,
    series::MeasurementSeries,
    store::MeasurementStore,
    time,
};
use std::{cell::RefCell, rc::Rc};

/// Synthetic serial number for site wide values that belong to no single
/// device.
pub const HOUSEHOLD_SERIAL: u32 = 0xcafe_babe;

/// Computes derived values at every end of packet and forwards everything to
/// the producer sink.
///
/// Derived values only combine measurements whose timestamps agree: the
/// operands of a sum must be within one second of each other, and nothing is
/// derived from measurements older than the configured maximum age.
pub struct DerivedValueProcessor {
    producer: Rc<RefCell<dyn Producer>>,
    rates: TariffRates,
    max_age_secs: u32,
    now_ms: Box<dyn Fn() -> u64>,
}

impl DerivedValueProcessor {
    /// Create a processor feeding `producer`, using the wall clock.
    pub fn new(
        producer: Rc<RefCell<dyn Producer>>,
        rates: TariffRates,
        max_age_secs: u32,
    ) -> Self {
        Self::with_clock(
            producer,
            rates,
            max_age_secs,
            Box::new(crate::localhost::LocalHost::unix_epoch_ms),
        )
    }

    /// Create a processor with an explicit time source.
    pub fn with_clock(
        producer: Rc<RefCell<dyn Producer>>,
        rates: TariffRates,
        max_age_secs: u32,
        now_ms: Box<dyn Fn() -> u64>,
    ) -> Self {
        Self {
            producer,
            rates,
            max_age_secs,
            now_ms,
        }
    }

    /// Mean of the pairwise difference between two series, taken over the
    /// sample pairs with matching timestamps.
    fn signed_mean(positive: &MeasurementSeries, negative: &MeasurementSeries) -> Option<f64> {
        let mut sum = 0.0;
        let mut count = 0u32;

        for i in 0..positive.len().min(negative.len()) {
            let p = positive.get(i)?;
            let n = negative.get(i)?;
            if p.time == n.time {
                sum += p.value - n.value;
                count += 1;
            }
        }

        if count == 0 {
            return None;
        }
        Some(sum / f64::from(count))
    }

    /// Signed grid power per wire, from the positive and negative OBIS
    /// counterparts of a finished emeter packet.
    fn emeter_derived(&mut self, device: &DeviceRecord, store: &MeasurementStore, packet_time: u32) {
        const PAIRS: [(
            &obis::ObisDefinition,
            &obis::ObisDefinition,
            &obis::ObisDefinition,
        ); 4] = [
            (
                &obis::POSITIVE_ACTIVE_POWER_L1,
                &obis::NEGATIVE_ACTIVE_POWER_L1,
                &obis::SIGNED_ACTIVE_POWER_L1,
            ),
            (
                &obis::POSITIVE_ACTIVE_POWER_L2,
                &obis::NEGATIVE_ACTIVE_POWER_L2,
                &obis::SIGNED_ACTIVE_POWER_L2,
            ),
            (
                &obis::POSITIVE_ACTIVE_POWER_L3,
                &obis::NEGATIVE_ACTIVE_POWER_L3,
                &obis::SIGNED_ACTIVE_POWER_L3,
            ),
            (
                &obis::POSITIVE_ACTIVE_POWER_TOTAL,
                &obis::NEGATIVE_ACTIVE_POWER_TOTAL,
                &obis::SIGNED_ACTIVE_POWER_TOTAL,
            ),
        ];

        let mut producer = self.producer.borrow_mut();

        for (positive, negative, signed) in PAIRS {
            let (Some(pos), Some(neg)) = (
                store.obis_measurement(positive),
                store.obis_measurement(negative),
            ) else {
                continue;
            };

            let Some(value) = Self::signed_mean(&pos.series, &neg.series) else {
                continue;
            };

            producer.produce(
                device.address.serial_number,
                &signed.measurement_type,
                signed.wire,
                value,
                packet_time,
            );
        }

        producer.flush();
    }

    /// DC/AC totals, loss, efficiency, household consumption and tariff
    /// values after a finished inverter polling round.
    fn inverter_derived(&mut self, device: &DeviceRecord, store: &MeasurementStore) {
        let now_ms = (self.now_ms)();
        let inverter_now = time::inverter_now(now_ms);
        let serial = device.address.serial_number;

        let mut producer = self.producer.borrow_mut();

        // DC total over both MPP inputs.
        let mut dc = None;
        if let (Some(mpp1), Some(mpp2)) = (
            store.register_measurement(&registers::DC_POWER_MPP1),
            store.register_measurement(&registers::DC_POWER_MPP2),
        ) {
            if let (Some(s1), Some(s2)) = (mpp1.series.newest(), mpp2.series.newest()) {
                let age = time::abs_diff32(inverter_now, s1.time);
                if time::abs_diff32(s1.time, s2.time) <= 1 && age <= self.max_age_secs {
                    let total = mpp1.series.mean() + mpp2.series.mean();
                    producer.produce(
                        serial,
                        &MeasurementType::inverter_power(),
                        Wire::MppTotal,
                        total,
                        s1.time,
                    );
                    dc = Some((total, age));
                }
            }
        }

        // AC total over the three phases.
        let mut ac = None;
        if let (Some(l1), Some(l2), Some(l3)) = (
            store.register_measurement(&registers::AC_POWER_L1),
            store.register_measurement(&registers::AC_POWER_L2),
            store.register_measurement(&registers::AC_POWER_L3),
        ) {
            if let (Some(s1), Some(s2), Some(s3)) = (
                l1.series.newest(),
                l2.series.newest(),
                l3.series.newest(),
            ) {
                let age = time::abs_diff32(inverter_now, s1.time);
                if time::abs_diff32(s1.time, s2.time) <= 1
                    && time::abs_diff32(s1.time, s3.time) <= 1
                    && age <= self.max_age_secs
                {
                    let total = l1.series.mean() + l2.series.mean() + l3.series.mean();
                    producer.produce(
                        serial,
                        &MeasurementType::inverter_power(),
                        Wire::Total,
                        total,
                        s1.time,
                    );
                    ac = Some((total, age, s1.time));
                }
            }
        }

        // Loss and efficiency once DC and AC stem from the same round.
        if let (Some((dc_total, dc_age)), Some((ac_total, ac_age, ac_time))) = (dc, ac) {
            if dc_age.abs_diff(ac_age) <= 2 {
                producer.produce(
                    serial,
                    &MeasurementType::inverter_loss(),
                    Wire::LossTotal,
                    dc_total - ac_total,
                    ac_time,
                );

                let efficiency = if dc_total > 0.0 {
                    ac_total / dc_total * 100.0
                } else {
                    0.0
                };
                producer.produce(
                    serial,
                    &MeasurementType::inverter_efficiency(),
                    Wire::None,
                    efficiency,
                    ac_time,
                );
            }
        }

        // Household consumption: grid draw plus own production minus grid
        // feed. The emeter runs on a millisecond clock, so the AC timestamp
        // is converted before the nearest neighbour lookup.
        if let (Some(pos), Some(neg)) = (
            store.obis_measurement(&obis::POSITIVE_ACTIVE_POWER_TOTAL),
            store.obis_measurement(&obis::NEGATIVE_ACTIVE_POWER_TOTAL),
        ) {
            let Some(feed_in_sample) = neg.series.newest() else {
                producer.flush();
                return;
            };

            let grid_age =
                time::abs_diff32(time::emeter_now(now_ms), feed_in_sample.time);
            if grid_age < self.max_age_secs.saturating_mul(1000) {
                let neg_mean = neg.series.mean();

                let (household, ac_total) = match ac {
                    None => ((pos.series.mean() - neg_mean).max(0.0), 0.0),
                    Some((ac_total, _, ac_time)) => {
                        let ac_time_emeter = time::inverter_to_emeter(ac_time, now_ms);
                        let pos_at = pos
                            .series
                            .find_closest(ac_time_emeter)
                            .map(|s| s.value)
                            .unwrap_or_default();
                        let neg_at = neg
                            .series
                            .find_closest(ac_time_emeter)
                            .map(|s| s.value)
                            .unwrap_or_default();

                        ((pos_at + ac_total - neg_at).max(0.0), ac_total)
                    }
                };

                producer.produce(
                    HOUSEHOLD_SERIAL,
                    &MeasurementType::inverter_power(),
                    Wire::Total,
                    household,
                    feed_in_sample.time,
                );

                let feed_in = neg_mean * (self.rates.feed_in_eur_per_kwh / 1000.0);
                let self_consumption =
                    (ac_total - neg_mean) * (self.rates.self_consumption_eur_per_kwh / 1000.0);

                producer.produce(
                    HOUSEHOLD_SERIAL,
                    &MeasurementType::currency(),
                    Wire::FeedIn,
                    feed_in,
                    feed_in_sample.time,
                );
                producer.produce(
                    HOUSEHOLD_SERIAL,
                    &MeasurementType::currency(),
                    Wire::SelfConsumption,
                    self_consumption,
                    feed_in_sample.time,
                );
                producer.produce(
                    HOUSEHOLD_SERIAL,
                    &MeasurementType::currency(),
                    Wire::Total,
                    feed_in + self_consumption,
                    feed_in_sample.time,
                );
            }
        }

        producer.flush();
    }
}

impl MeasurementConsumer for DerivedValueProcessor {
    /// Forward a plain measurement: the series mean at the newest timestamp.
    fn consume(&mut self, device: &DeviceRecord, measurement: &Measurement) {
        let Some(sample) = measurement.series.newest() else {
            return;
        };

        self.producer.borrow_mut().produce(
            device.address.serial_number,
            &measurement.measurement_type,
            measurement.wire,
            measurement.series.mean(),
            sample.time,
        );
    }

    fn end_of_batch(&mut self, device: &DeviceRecord, store: &MeasurementStore, time: u32) {
        if device.device_class.is_inverter() {
            self.inverter_derived(device, store);
        } else {
            self.emeter_derived(device, store, time);
        }
    }
}
