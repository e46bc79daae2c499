//! Device instance directory.
//!
//! One record per physical unit of a device type (charger #1, charger #2,
//! ...), stored densely by [`DeviceInstance`] index. The set of units is fixed
//! at initialisation and never shrinks.
//!
//! Drivers share their directory with the receive handlers they register
//! through [`SharedDirectory`]; [`RecordHandler`] looks up the record for the
//! instance the service passes to the callback.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::data_link::Frame;
use crate::error::{CanError, Result};
use crate::service::{Liveness, RxHandler, RxKey};
use crate::types::DeviceInstance;

/// Directory shared between a driver and its receive handlers
pub type SharedDirectory<R> = Arc<Mutex<DeviceDirectory<R>>>;

/// Instance ids are a byte wide, so a directory never holds more records
pub const MAX_INSTANCES: usize = u8::MAX as usize + 1;

/// Fixed-capacity per-device-type record store
#[derive(Debug)]
pub struct DeviceDirectory<R> {
    records: Vec<Option<R>>,
    count: usize,
}

impl<R> DeviceDirectory<R> {
    /// Capacities above [`MAX_INSTANCES`] are clamped
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: (0..capacity.min(MAX_INSTANCES)).map(|_| None).collect(),
            count: 0,
        }
    }

    pub fn shared(capacity: usize) -> SharedDirectory<R> {
        Arc::new(Mutex::new(Self::with_capacity(capacity)))
    }

    /// Number of instances created so far
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    pub fn lookup(&self, instance: DeviceInstance) -> Result<&R> {
        self.records
            .get(instance.index())
            .and_then(Option::as_ref)
            .ok_or(CanError::UnknownDevice(instance))
    }

    pub fn lookup_mut(&mut self, instance: DeviceInstance) -> Result<&mut R> {
        self.records
            .get_mut(instance.index())
            .and_then(Option::as_mut)
            .ok_or(CanError::UnknownDevice(instance))
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceInstance, &R)> {
        self.records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| Some((DeviceInstance(u8::try_from(i).ok()?), r.as_ref()?)))
    }
}

impl<R: Default> DeviceDirectory<R> {
    /// Adds a default-initialised record for `instance`
    pub fn create_or_append(&mut self, instance: DeviceInstance) -> Result<&mut R> {
        let capacity = self.records.len();
        let slot = self
            .records
            .get_mut(instance.index())
            .ok_or(CanError::OutOfCapacity {
                table: "device",
                capacity,
            })?;
        if slot.is_some() {
            return Err(CanError::DuplicateDevice(instance));
        }
        self.count += 1;
        debug!(%instance, count = self.count, "device instance created");
        Ok(slot.insert(R::default()))
    }
}

fn ignore_record<R>(_: &mut R) {}

/// Receive handler that runs closures on the record of the callback's instance
///
/// Both callbacks lock the shared directory. The lock is not reentrant: never
/// hold a directory guard across a `CanService::dispatch`,
/// `process_received` or `tick_liveness_supervisor` call, or the callback
/// deadlocks.
pub struct RecordHandler<R, F, T> {
    directory: SharedDirectory<R>,
    receive: F,
    timeout: T,
}

impl<R, F> RecordHandler<R, F, fn(&mut R)>
where
    F: FnMut(&mut R, &Frame) -> Result<()> + Send,
{
    pub fn new(directory: SharedDirectory<R>, receive: F) -> Self {
        Self {
            directory,
            receive,
            timeout: ignore_record::<R>,
        }
    }
}

impl<R, F, T> RecordHandler<R, F, T> {
    pub fn with_timeout<T2>(self, timeout: T2) -> RecordHandler<R, F, T2>
    where
        T2: FnMut(&mut R) + Send,
    {
        RecordHandler {
            directory: self.directory,
            receive: self.receive,
            timeout,
        }
    }
}

impl<R, F, T> RxHandler for RecordHandler<R, F, T>
where
    R: Send,
    F: FnMut(&mut R, &Frame) -> Result<()> + Send,
    T: FnMut(&mut R) + Send,
{
    fn on_receive(&mut self, device: DeviceInstance, frame: &Frame, _: &mut Liveness) -> Result<()> {
        let mut directory = self.directory.lock();
        let record = directory.lookup_mut(device)?;
        (self.receive)(record, frame)
    }

    fn on_timeout(&mut self, device: DeviceInstance, key: &RxKey) {
        let mut directory = self.directory.lock();
        match directory.lookup_mut(device) {
            Ok(record) => (self.timeout)(record),
            Err(_) => warn!(%device, %key, "timeout for unknown device instance"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physical::mock::MockBus;
    use crate::service::{CanService, ServiceConfig, TimeoutLimit};
    use crate::types::{BusLine, ModuleId};

    #[derive(Debug, Default)]
    struct Charger {
        voltage: u16,
        status_ok: bool,
    }

    #[test]
    fn test_create_and_lookup() {
        let mut dir: DeviceDirectory<Charger> = DeviceDirectory::with_capacity(2);
        dir.create_or_append(DeviceInstance(1)).unwrap().voltage = 400;
        assert_eq!(dir.count(), 1);
        assert_eq!(dir.lookup(DeviceInstance(1)).unwrap().voltage, 400);
        assert!(matches!(
            dir.lookup(DeviceInstance(0)),
            Err(CanError::UnknownDevice(DeviceInstance(0)))
        ));
    }

    #[test]
    fn test_duplicate_and_capacity() {
        let mut dir: DeviceDirectory<Charger> = DeviceDirectory::with_capacity(1);
        dir.create_or_append(DeviceInstance(0)).unwrap();
        assert!(matches!(
            dir.create_or_append(DeviceInstance(0)),
            Err(CanError::DuplicateDevice(_))
        ));
        assert!(matches!(
            dir.create_or_append(DeviceInstance(1)),
            Err(CanError::OutOfCapacity { table: "device", .. })
        ));
        assert_eq!(dir.count(), 1);
        assert_eq!(dir.iter().count(), 1);
    }

    #[test]
    fn test_capacity_clamped_to_instance_range() {
        let mut dir: DeviceDirectory<Charger> = DeviceDirectory::with_capacity(1000);
        assert_eq!(dir.capacity(), MAX_INSTANCES);
        dir.create_or_append(DeviceInstance(255)).unwrap().voltage = 48;
        let (instance, record) = dir.iter().next().unwrap();
        assert_eq!(instance, DeviceInstance(255));
        assert_eq!(record.voltage, 48);
    }

    #[test]
    fn test_record_handler_routes_by_instance() {
        let dir = DeviceDirectory::<Charger>::shared(2);
        dir.lock().create_or_append(DeviceInstance(0)).unwrap();
        dir.lock().create_or_append(DeviceInstance(1)).unwrap();

        let mut service = CanService::new(ServiceConfig::default(), MockBus::new()).unwrap();
        for (instance, id) in [(0u8, 0x610), (1u8, 0x611)] {
            let key = RxKey::plain(ModuleId(0), BusLine::Can2, id);
            let handler = RecordHandler::new(dir.clone(), |rec: &mut Charger, frame: &Frame| {
                rec.voltage = frame.decode::<u16>()?;
                rec.status_ok = true;
                Ok(())
            })
            .with_timeout(|rec: &mut Charger| rec.status_ok = false);
            service
                .register_receive(key, DeviceInstance(instance), handler)
                .unwrap();
            service
                .set_timeout_limit(&key, TimeoutLimit::from_ticks(2))
                .unwrap();
        }

        let frame = Frame::standard(0x611, &[0x90, 0x01]).unwrap();
        service.dispatch(&frame, ModuleId(0), BusLine::Can2).unwrap();
        // The handler's guard is gone once dispatch returns
        assert!(dir.try_lock().is_some());
        {
            let dir = dir.lock();
            assert_eq!(dir.lookup(DeviceInstance(1)).unwrap().voltage, 400);
            assert!(dir.lookup(DeviceInstance(1)).unwrap().status_ok);
            assert_eq!(dir.lookup(DeviceInstance(0)).unwrap().voltage, 0);
        }

        service.tick_liveness_supervisor();
        service.tick_liveness_supervisor();
        assert!(!dir.lock().lookup(DeviceInstance(1)).unwrap().status_ok);
    }

    #[test]
    fn test_record_handler_unknown_instance() {
        let dir = DeviceDirectory::<Charger>::shared(2);
        let mut service = CanService::new(ServiceConfig::default(), MockBus::new()).unwrap();
        let key = RxKey::plain(ModuleId(0), BusLine::Can1, 0x620);
        service
            .register_receive(
                key,
                DeviceInstance(0),
                RecordHandler::new(dir, |_: &mut Charger, _: &Frame| Ok(())),
            )
            .unwrap();

        let frame = Frame::standard(0x620, &[]).unwrap();
        let err = service
            .dispatch(&frame, ModuleId(0), BusLine::Can1)
            .unwrap_err();
        assert!(matches!(err, CanError::UnknownDevice(DeviceInstance(0))));
        assert_eq!(service.stats().handler_errors, 1);
    }
}
