//! Trace sinks for PHY statistics
//!
//! The PHY reports one record per event; what happens to it is up to the sink.

use crate::message_types::MessageType;
use crate::InterfaceError;
use common::{BwpId, CellId, Rnti, SfnSf};
use serde::Serialize;
use std::cell::RefCell;
use std::io::{BufWriter, Write};
use std::rc::Rc;
use tracing::debug;

/// Resource usage of one slot, either for data or for control
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotStats {
    pub sfn: SfnSf,
    pub active_ues: usize,
    /// Resource element groups used (RBs times symbols)
    pub used_reg: u32,
    pub used_sym: u32,
    pub available_rb: u32,
    pub available_sym: u32,
    pub bwp_id: BwpId,
    pub cell_id: CellId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RbStats {
    pub sfn: SfnSf,
    pub sym_start: u8,
    pub rbs: Vec<u32>,
    pub bwp_id: BwpId,
    pub cell_id: CellId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CtrlMsgTrace {
    pub sfn: SfnSf,
    pub cell_id: CellId,
    pub rnti: Rnti,
    pub bwp_id: BwpId,
    pub message_type: MessageType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceRecord {
    SlotData(SlotStats),
    SlotCtrl(SlotStats),
    Rb(RbStats),
    TxCtrlMsg(CtrlMsgTrace),
    RxCtrlMsg(CtrlMsgTrace),
}

pub trait PhyTraceSink {
    fn record(&mut self, record: TraceRecord) -> Result<(), InterfaceError>;

    /// Push buffered records to their destination
    fn flush(&mut self) -> Result<(), InterfaceError> {
        Ok(())
    }
}

/// Discards every record
#[derive(Debug, Default)]
pub struct NullTraceSink;

impl PhyTraceSink for NullTraceSink {
    fn record(&mut self, _record: TraceRecord) -> Result<(), InterfaceError> {
        Ok(())
    }
}

/// Writes one JSON object per line
pub struct JsonLinesTraceSink<W: Write> {
    writer: BufWriter<W>,
    written: u64,
}

impl<W: Write> JsonLinesTraceSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer: BufWriter::new(writer), written: 0 }
    }

    pub fn records_written(&self) -> u64 {
        self.written
    }
}

impl<W: Write> PhyTraceSink for JsonLinesTraceSink<W> {
    fn record(&mut self, record: TraceRecord) -> Result<(), InterfaceError> {
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), InterfaceError> {
        self.writer.flush()?;
        debug!("Trace flushed, {} records written", self.written);
        Ok(())
    }
}

/// Keeps records in memory; clones share the same buffer
#[derive(Debug, Clone, Default)]
pub struct MemoryTraceSink {
    records: Rc<RefCell<Vec<TraceRecord>>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }
}

impl PhyTraceSink for MemoryTraceSink {
    fn record(&mut self, record: TraceRecord) -> Result<(), InterfaceError> {
        self.records.borrow_mut().push(record);
        Ok(())
    }
}
