use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use carrier_can::data_link::codec::{PayloadReader, PayloadWriter, WireDecode, WireEncode};
use carrier_can::data_link::{Frame, IdKind};
use carrier_can::device::{DeviceDirectory, RecordHandler, SharedDirectory};
use carrier_can::error::{CanError, Result};
use carrier_can::network::J1939Id;
use carrier_can::physical::{BusPort, ReceivedFrame};
use carrier_can::service::{
    rx_fn, CanService, DispatchOutcome, RxKey, ServiceConfig, TimeoutLimit, TxHandle,
    TxInterval, TxOutcome, TxSpec,
};
use carrier_can::types::{BusLine, DeviceInstance, ModuleId};

const MODULE: ModuleId = ModuleId(0);

/// Bus double: records transmits, replays queued receives
#[derive(Default)]
struct VehicleBus {
    sent: Vec<ReceivedFrame>,
    inbound: VecDeque<ReceivedFrame>,
}

impl BusPort for VehicleBus {
    fn place_on_bus(&mut self, module: ModuleId, line: BusLine, frame: &Frame) -> Result<()> {
        self.sent.push(ReceivedFrame {
            module,
            line,
            frame: frame.clone(),
        });
        Ok(())
    }

    fn poll_received(&mut self) -> Option<ReceivedFrame> {
        self.inbound.pop_front()
    }
}

fn new_service() -> CanService<VehicleBus> {
    CanService::new(ServiceConfig::default(), VehicleBus::default()).unwrap()
}

#[test]
fn test_scenario_plain_dispatch() {
    let mut service = new_service();
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();
    let key = RxKey::plain(MODULE, BusLine::Can1, 0x100);
    service
        .register_receive(
            key,
            DeviceInstance(0),
            rx_fn(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();

    let frame = Frame::standard(0x100, &[0x11]).unwrap();
    service.dispatch(&frame, MODULE, BusLine::Can1).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(service.liveness(&key).unwrap().count(), 0);

    let frame = Frame::standard(0x200, &[0x11]).unwrap();
    assert_eq!(
        service.dispatch(&frame, MODULE, BusLine::Can1).unwrap(),
        DispatchOutcome::Unmatched
    );
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_scenario_timeout_after_five_ticks() {
    let mut service = new_service();
    let fired = Arc::new(AtomicU32::new(0));
    let counter = fired.clone();
    let key = RxKey::plain(MODULE, BusLine::Can1, 0x100);
    service
        .register_receive(
            key,
            DeviceInstance(0),
            rx_fn(|_, _| Ok(())).with_timeout(move |_, _: &RxKey| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
    service
        .set_timeout_limit(&key, TimeoutLimit::from_ticks(5))
        .unwrap();

    for _ in 0..4 {
        service.tick_liveness_supervisor();
    }
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    service.tick_liveness_supervisor();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    service.tick_liveness_supervisor();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_scenario_transmit_interval_three() {
    let mut service = new_service();
    let handle = service
        .register_transmit(TxSpec::new(
            DeviceInstance(0),
            MODULE,
            BusLine::Can1,
            0x400,
            IdKind::Standard,
            2,
        ))
        .unwrap();

    let mut sent_on = Vec::new();
    for call in 1..=4 {
        let outcome = service
            .tick_transmit(handle, TxInterval::from_ticks(3), &0x1234u16)
            .unwrap();
        if outcome == TxOutcome::Sent {
            sent_on.push(call);
        }
    }
    assert_eq!(sent_on, vec![1, 4]);
    assert_eq!(service.port().sent.len(), 2);
    assert_eq!(service.port().sent[0].frame.payload(), &[0x34, 0x12]);
}

#[test]
fn test_scenario_discriminator_fallback() {
    let mut service = new_service();
    let plain = Arc::new(AtomicU32::new(0));
    let mux = Arc::new(AtomicU32::new(0));
    let (p, m) = (plain.clone(), mux.clone());
    service
        .register_receive(
            RxKey::plain(MODULE, BusLine::Can1, 0x300),
            DeviceInstance(0),
            rx_fn(move |_, _| {
                p.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();
    service
        .register_receive(
            RxKey::discriminated(MODULE, BusLine::Can1, 0x300, 0x05),
            DeviceInstance(0),
            rx_fn(move |_, _| {
                m.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();

    let frame = Frame::standard(0x300, &[0x05, 0, 0]).unwrap();
    service.dispatch(&frame, MODULE, BusLine::Can1).unwrap();
    assert_eq!((plain.load(Ordering::SeqCst), mux.load(Ordering::SeqCst)), (0, 1));

    let frame = Frame::standard(0x300, &[0x09, 0, 0]).unwrap();
    service.dispatch(&frame, MODULE, BusLine::Can1).unwrap();
    assert_eq!((plain.load(Ordering::SeqCst), mux.load(Ordering::SeqCst)), (1, 1));
}

// A two-unit charger driver built on the public API: each charger reports a
// multiplexed status PGN (sub-message 0x01 = output, 0x02 = faults) and is
// commanded with a periodic setpoint frame that must go out on the first tick.

const CHARGER_STATUS_PGN: u32 = 0xFF50;
const CHARGER_COMMAND_PGN: u32 = 0xEF00;
const CONTROLLER_ADDRESS: u8 = 0xF9;

#[derive(Debug, Default)]
struct ChargerRecord {
    output_voltage_dv: u16,
    output_current_da: i16,
    fault_bits: u32,
    output_rx_ok: bool,
    command: ChargerCommand,
    command_tx: Option<TxHandle>,
}

#[derive(Debug, Default, Clone, Copy)]
struct ChargerCommand {
    enable: bool,
    voltage_dv: u16,
    current_da: u16,
}

impl WireEncode for ChargerCommand {
    fn encode(&self, writer: &mut PayloadWriter) -> Result<()> {
        writer.put_u8(self.enable as u8)?;
        writer.put_u16(self.voltage_dv)?;
        writer.put_u16(self.current_da)?;
        writer.pad(3, 0xFF)
    }
}

struct ChargerOutput {
    voltage_dv: u16,
    current_da: i16,
}

impl WireDecode for ChargerOutput {
    fn decode(reader: &mut PayloadReader<'_>) -> Result<Self> {
        reader.skip(1)?;
        Ok(Self {
            voltage_dv: reader.u16()?,
            current_da: reader.i16()?,
        })
    }
}

struct ChargerDriver {
    records: SharedDirectory<ChargerRecord>,
}

impl ChargerDriver {
    fn new(units: usize) -> Self {
        Self {
            records: DeviceDirectory::shared(units),
        }
    }

    fn status_id(address: u8) -> u32 {
        J1939Id::new(6, CHARGER_STATUS_PGN, address)
            .unwrap()
            .to_raw()
    }

    fn init<P: BusPort>(
        &self,
        service: &mut CanService<P>,
        instance: DeviceInstance,
        address: u8,
        line: BusLine,
    ) -> Result<()> {
        let status_id = Self::status_id(address);

        let output_key = RxKey::discriminated(MODULE, line, status_id, 0x01);
        service.register_receive(
            output_key,
            instance,
            RecordHandler::new(self.records.clone(), |rec: &mut ChargerRecord, frame: &Frame| {
                let output: ChargerOutput = frame.decode()?;
                rec.output_voltage_dv = output.voltage_dv;
                rec.output_current_da = output.current_da;
                rec.output_rx_ok = true;
                Ok(())
            })
            .with_timeout(|rec: &mut ChargerRecord| rec.output_rx_ok = false),
        )?;
        service.set_timeout_limit(&output_key, TimeoutLimit::from_ticks(10))?;

        service.register_receive(
            RxKey::discriminated(MODULE, line, status_id, 0x02),
            instance,
            RecordHandler::new(self.records.clone(), |rec: &mut ChargerRecord, frame: &Frame| {
                let mut reader = PayloadReader::new(frame.payload());
                reader.skip(1)?;
                rec.fault_bits = reader.u32()?;
                Ok(())
            }),
        )?;

        let command_id =
            J1939Id::to_destination(6, CHARGER_COMMAND_PGN, address, CONTROLLER_ADDRESS)?.to_raw();
        let command_tx = service.register_transmit(TxSpec::new(
            instance,
            MODULE,
            line,
            command_id,
            IdKind::Extended,
            8,
        ))?;

        let mut records = self.records.lock();
        let record = records.create_or_append(instance)?;
        record.command_tx = Some(command_tx);
        Ok(())
    }

    fn send<P: BusPort>(&self, service: &mut CanService<P>) -> Result<()> {
        let pending: Vec<(TxHandle, ChargerCommand)> = self
            .records
            .lock()
            .iter()
            .filter_map(|(_, rec)| rec.command_tx.map(|tx| (tx, rec.command)))
            .collect();
        for (tx, command) in pending {
            service.tick_transmit(tx, TxInterval::from_ticks(10), &command)?;
        }
        Ok(())
    }
}

#[test]
fn test_charger_driver_control_loop() {
    let mut service = new_service();
    let chargers = ChargerDriver::new(2);
    chargers
        .init(&mut service, DeviceInstance(0), 0x50, BusLine::Can2)
        .unwrap();
    chargers
        .init(&mut service, DeviceInstance(1), 0x51, BusLine::Can2)
        .unwrap();
    assert_eq!(chargers.records.lock().count(), 2);
    assert!(matches!(
        chargers.init(&mut service, DeviceInstance(1), 0x51, BusLine::Can2),
        Err(CanError::DuplicateRegistration(_))
    ));

    chargers
        .records
        .lock()
        .lookup_mut(DeviceInstance(1))
        .unwrap()
        .command = ChargerCommand {
        enable: true,
        voltage_dv: 4000,
        current_da: 150,
    };

    let status_1 = ChargerDriver::status_id(0x51);
    service.port_mut().inbound.push_back(ReceivedFrame {
        module: MODULE,
        line: BusLine::Can2,
        frame: Frame::extended(status_1, &[0x01, 0x98, 0x0F, 0x64, 0x00]).unwrap(),
    });
    service.port_mut().inbound.push_back(ReceivedFrame {
        module: MODULE,
        line: BusLine::Can2,
        frame: Frame::extended(status_1, &[0x02, 0x04, 0x00, 0x00, 0x80]).unwrap(),
    });

    // Twenty 10 ms ticks
    for _ in 0..20 {
        service.process_received().unwrap();
        service.tick_liveness_supervisor();
        chargers.send(&mut service).unwrap();
    }

    {
        let records = chargers.records.lock();
        let unit = records.lookup(DeviceInstance(1)).unwrap();
        assert_eq!(unit.output_voltage_dv, 3992);
        assert_eq!(unit.output_current_da, 100);
        assert_eq!(unit.fault_bits, 0x8000_0004);
        // Ten silent ticks since the status frame: stale again
        assert!(!unit.output_rx_ok);
        assert!(!records.lookup(DeviceInstance(0)).unwrap().output_rx_ok);
    }
    assert!(service
        .timeout_status(&RxKey::discriminated(MODULE, BusLine::Can2, status_1, 0x01))
        .unwrap());

    // Each unit: first tick, then ticks 11 and 21 would be due; 20 ticks give 2 sends
    let command_1 = J1939Id::to_destination(6, CHARGER_COMMAND_PGN, 0x51, CONTROLLER_ADDRESS)
        .unwrap()
        .to_raw();
    let sent: Vec<&Frame> = service
        .port()
        .sent
        .iter()
        .filter(|s| s.frame.id() == command_1)
        .map(|s| &s.frame)
        .collect();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].is_extended());
    assert_eq!(
        sent[0].payload(),
        &[0x01, 0xA0, 0x0F, 0x96, 0x00, 0xFF, 0xFF, 0xFF]
    );
    assert_eq!(service.port().sent.len(), 4);
}
