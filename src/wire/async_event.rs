// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Asynchronous Event Request completion decoding (DW0/DW1).
//!
//! Grounded on `original_source/parsers/async_event.py` and
//! `models.py`'s event enums. Unrecognized event-type/info values are
//! preserved as raw values rather than erroring, matching the original's
//! `except ValueError: event_type = event_type_raw` fallback.

/// `AET`, Dword 0 bits 2:0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncEventType {
    ErrorStatus,
    SmartHealthStatus,
    Notice,
    Immediate,
    OneShot,
    IoCommandSpecific,
    VendorSpecific,
    /// A raw value with no recognized meaning (bits 2:0 can only be
    /// 0-7, so every value is representable; 0x05 is reserved).
    Unknown(u8),
}

impl AsyncEventType {
    fn from_raw(v: u8) -> Self {
        match v & 0x7 {
            0x00 => AsyncEventType::ErrorStatus,
            0x01 => AsyncEventType::SmartHealthStatus,
            0x02 => AsyncEventType::Notice,
            0x03 => AsyncEventType::Immediate,
            0x04 => AsyncEventType::OneShot,
            0x06 => AsyncEventType::IoCommandSpecific,
            0x07 => AsyncEventType::VendorSpecific,
            other => AsyncEventType::Unknown(other),
        }
    }
}

/// `AEI` for Notice events (Type 0x02).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncEventInfoNotice {
    NamespaceAttributeChanged,
    FirmwareActivationStarting,
    TelemetryLogChanged,
    AnaChange,
    PredictableLatencyAggrChanged,
    LbaStatusInfoAlert,
    EnduranceGroupAggrChanged,
    ReachabilityGroupChange,
    ReachabilityAssociationChange,
    AllocatedNamespaceAttributeChanged,
    ZoneDescriptorChanged,
    DiscoveryLogChanged,
    HostDiscoveryLogChanged,
    CrossControllerResetCompleted,
    LostHostCommunication,
    Unknown(u8),
}

impl AsyncEventInfoNotice {
    fn from_raw(v: u8) -> Self {
        match v {
            0x00 => AsyncEventInfoNotice::NamespaceAttributeChanged,
            0x01 => AsyncEventInfoNotice::FirmwareActivationStarting,
            0x02 => AsyncEventInfoNotice::TelemetryLogChanged,
            0x03 => AsyncEventInfoNotice::AnaChange,
            0x04 => AsyncEventInfoNotice::PredictableLatencyAggrChanged,
            0x05 => AsyncEventInfoNotice::LbaStatusInfoAlert,
            0x06 => AsyncEventInfoNotice::EnduranceGroupAggrChanged,
            0x07 => AsyncEventInfoNotice::ReachabilityGroupChange,
            0x08 => AsyncEventInfoNotice::ReachabilityAssociationChange,
            0x09 => AsyncEventInfoNotice::AllocatedNamespaceAttributeChanged,
            0xEF => AsyncEventInfoNotice::ZoneDescriptorChanged,
            0xF0 => AsyncEventInfoNotice::DiscoveryLogChanged,
            0xF1 => AsyncEventInfoNotice::HostDiscoveryLogChanged,
            0xF3 => AsyncEventInfoNotice::CrossControllerResetCompleted,
            0xF4 => AsyncEventInfoNotice::LostHostCommunication,
            other => AsyncEventInfoNotice::Unknown(other),
        }
    }
}

/// `AEI` for Immediate events (Type 0x03).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncEventInfoImmediate {
    NormalSubsystemShutdown,
    TemperatureThresholdHysteresis,
    Unknown(u8),
}

impl AsyncEventInfoImmediate {
    fn from_raw(v: u8) -> Self {
        match v {
            0x00 => AsyncEventInfoImmediate::NormalSubsystemShutdown,
            0x01 => AsyncEventInfoImmediate::TemperatureThresholdHysteresis,
            other => AsyncEventInfoImmediate::Unknown(other),
        }
    }
}

/// A decoded asynchronous event notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncEvent {
    pub event_type: AsyncEventType,
    pub event_info: u8,
    pub log_page_id: u8,
    pub event_specific_param: u32,
}

impl AsyncEvent {
    /// Decodes completion DW0 bits `{type(2:0), info(15:8), log_page(23:16)}`
    /// plus DW1 as the event-specific parameter.
    pub fn parse(dw0: u32, dw1: u32) -> Self {
        let event_type = AsyncEventType::from_raw((dw0 & 0x7) as u8);
        let event_info = ((dw0 >> 8) & 0xFF) as u8;
        let log_page_id = ((dw0 >> 16) & 0xFF) as u8;
        AsyncEvent { event_type, event_info, log_page_id, event_specific_param: dw1 }
    }

    /// Decodes `event_info` as a Notice-event information code; only
    /// meaningful when `event_type == Notice`.
    pub fn as_notice_info(&self) -> AsyncEventInfoNotice {
        AsyncEventInfoNotice::from_raw(self.event_info)
    }

    /// Decodes `event_info` as an Immediate-event information code; only
    /// meaningful when `event_type == Immediate`.
    pub fn as_immediate_info(&self) -> AsyncEventInfoImmediate {
        AsyncEventInfoImmediate::from_raw(self.event_info)
    }
}
