//! In-memory stack used by unit tests.
//!
//! Records every request and serves a configurable topology. Completions are
//! never generated automatically; tests feed `StackEvent`s by hand.

use std::collections::HashMap;
use std::time::Duration;

use btleplug::api::WriteType;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::ble::stack::{AdapterState, BleStack, ConnectOptions, PeripheralHandle};
use crate::ble::topology::GattService;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakePeripheral {
    pub id: String,
    pub name: Option<String>,
}

impl FakePeripheral {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
        }
    }

    pub fn named(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: Some(name.to_string()),
        }
    }
}

impl PeripheralHandle for FakePeripheral {
    fn identifier(&self) -> String {
        self.id.clone()
    }
}

/// A request made to the fake stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackCall {
    StartScan(Uuid),
    StopScan,
    ArmScanTimer { timeout: Duration, generation: u64 },
    Connect { id: String, notify_on_disconnection: bool },
    CancelConnection(String),
    DiscoverServices(String),
    DiscoverCharacteristics { id: String, service: Uuid },
    SetNotify { id: String, handle: u16, enabled: bool },
    ReadValue { id: String, handle: u16 },
    WriteValue { id: String, handle: u16, data: Vec<u8>, with_response: bool },
    ReadRssi(String),
}

pub struct FakeStack {
    adapter_state: Mutex<AdapterState>,
    topology: Mutex<HashMap<String, Vec<GattService<u16>>>>,
    calls: Mutex<Vec<StackCall>>,
    refuse_scan: Mutex<bool>,
}

impl FakeStack {
    pub fn new() -> Self {
        Self {
            adapter_state: Mutex::new(AdapterState::PoweredOn),
            topology: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            refuse_scan: Mutex::new(false),
        }
    }

    pub fn set_adapter_state(&self, state: AdapterState) {
        *self.adapter_state.lock() = state;
    }

    pub fn set_topology(&self, id: &str, services: Vec<GattService<u16>>) {
        self.topology.lock().insert(id.to_string(), services);
    }

    pub fn refuse_scan(&self) {
        *self.refuse_scan.lock() = true;
    }

    pub fn calls(&self) -> Vec<StackCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&StackCall) -> bool,
    {
        self.calls.lock().iter().filter(|c| predicate(c)).count()
    }

    fn record(&self, call: StackCall) {
        self.calls.lock().push(call);
    }
}

impl Default for FakeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl BleStack for FakeStack {
    type Peripheral = FakePeripheral;
    type Characteristic = u16;

    fn adapter_state(&self) -> AdapterState {
        *self.adapter_state.lock()
    }

    fn start_scan(&self, service_filter: Uuid) -> Result<()> {
        if *self.refuse_scan.lock() {
            return Err(Error::Internal("scan refused".to_string()));
        }
        self.record(StackCall::StartScan(service_filter));
        Ok(())
    }

    fn stop_scan(&self) -> Result<()> {
        self.record(StackCall::StopScan);
        Ok(())
    }

    fn arm_scan_timer(&self, timeout: Duration, generation: u64) {
        self.record(StackCall::ArmScanTimer {
            timeout,
            generation,
        });
    }

    fn connect(&self, peripheral: &FakePeripheral, options: ConnectOptions) {
        self.record(StackCall::Connect {
            id: peripheral.id.clone(),
            notify_on_disconnection: options.notify_on_disconnection,
        });
    }

    fn cancel_connection(&self, peripheral: &FakePeripheral) {
        self.record(StackCall::CancelConnection(peripheral.id.clone()));
    }

    fn discover_services(&self, peripheral: &FakePeripheral) {
        self.record(StackCall::DiscoverServices(peripheral.id.clone()));
    }

    fn discover_characteristics(&self, peripheral: &FakePeripheral, service: Uuid) {
        self.record(StackCall::DiscoverCharacteristics {
            id: peripheral.id.clone(),
            service,
        });
    }

    fn services(&self, peripheral: &FakePeripheral) -> Vec<GattService<u16>> {
        self.topology
            .lock()
            .get(&peripheral.id)
            .cloned()
            .unwrap_or_default()
    }

    fn set_notify(&self, peripheral: &FakePeripheral, characteristic: &u16, enabled: bool) {
        self.record(StackCall::SetNotify {
            id: peripheral.id.clone(),
            handle: *characteristic,
            enabled,
        });
    }

    fn read_value(&self, peripheral: &FakePeripheral, characteristic: &u16) {
        self.record(StackCall::ReadValue {
            id: peripheral.id.clone(),
            handle: *characteristic,
        });
    }

    fn write_value(
        &self,
        peripheral: &FakePeripheral,
        characteristic: &u16,
        data: &[u8],
        write_type: WriteType,
    ) {
        self.record(StackCall::WriteValue {
            id: peripheral.id.clone(),
            handle: *characteristic,
            data: data.to_vec(),
            with_response: matches!(write_type, WriteType::WithResponse),
        });
    }

    fn read_rssi(&self, peripheral: &FakePeripheral) {
        self.record(StackCall::ReadRssi(peripheral.id.clone()));
    }
}
