//! The four Modbus register banks and the projection between engineering
//! units and 16-bit registers. This is the single point of shared mutable
//! state between the scan loop, the fieldbus server, and the dashboard; all
//! access is serialized by the owning mutex, and each bank is rewritten
//! wholesale so a reader never observes a partial-tick mix.

use anyhow::{bail, Result};

use crate::plant::{CoilSnapshot, PlantStatus, ScanResult, CL2_LOW};
use crate::process::SensorVector;

pub const NUM_COILS: usize = 20;
pub const NUM_DISCRETE_INPUTS: usize = 20;
pub const NUM_INPUT_REGISTERS: usize = 20;
pub const NUM_HOLDING_REGISTERS: usize = 30;

/// Coil offsets (0-indexed internally; external addresses are 00001+).
pub mod co {
    pub const INTAKE_CMD: usize = 0;
    pub const ALUM_CMD: usize = 1;
    pub const CL2_CMD: usize = 2;
    pub const BW_CMD: usize = 3;
    pub const AUTO_MODE: usize = 4;
    pub const ESTOP: usize = 5;
    pub const ALARM_ACK: usize = 6;
    pub const TURB_SHUTDOWN: usize = 7;
}

/// Discrete input offsets (10001+).
pub mod di {
    pub const INTAKE_RUN: usize = 0;
    pub const ALUM_RUN: usize = 1;
    pub const CL2_RUN: usize = 2;
    pub const BW_OPEN: usize = 3;
    pub const LEVEL_HIGH: usize = 4;
    pub const LEVEL_LOW: usize = 5;
    pub const BW_ACTIVE: usize = 6;
    pub const ALM_TURB: usize = 7;
    pub const ALM_CL2: usize = 8;
    pub const COMM_FAULT: usize = 9;
}

/// Input register offsets (30001+).
pub mod ir {
    pub const TURB_BACKUP: usize = 0;
    pub const PLANT_STATUS: usize = 1;
    pub const ALARM_WORD: usize = 2;
}

/// Holding register offsets (40001+). Offsets 8, 10 and 11 are allocated for
/// alum dose, dam release and level-cm but not driven by the scan loop; they
/// read back as zero.
pub mod hr {
    pub const TURB_RAW: usize = 0;
    pub const TURB_FILTERED: usize = 1;
    pub const PH: usize = 2;
    pub const CL2: usize = 3;
    pub const FLOW_RAW: usize = 4;
    pub const FLOW_TREATED: usize = 5;
    pub const LEVEL_PCT: usize = 6;
    pub const TEMP: usize = 7;
    pub const FILTER_DP: usize = 9;
    pub const BW_COUNT: usize = 12;
    pub const TOTAL_FLOW: usize = 13;
    pub const RUNTIME: usize = 14;
}

/// Scale an engineering value into an unsigned 16-bit register: multiply,
/// truncate toward zero, saturate to [0, 65535] (standard Modbus practice).
pub fn encode(value: f64, scale: f64) -> u16 {
    let scaled = value * scale;
    if !(scaled > 0.0) {
        // Also catches NaN.
        0
    } else if scaled >= 65535.0 {
        65535
    } else {
        scaled as u16
    }
}

/// Inverse of [`encode`], up to one quantum of the scale. Clients decode on
/// their side; here it pins down the scaling contract in the tests.
#[allow(dead_code)]
pub fn decode(raw: u16, scale: f64) -> f64 {
    raw as f64 / scale
}

// ---------------------------------------------------------------------------
// Register map
// ---------------------------------------------------------------------------

pub struct RegisterMap {
    coils: [bool; NUM_COILS],
    discrete: [bool; NUM_DISCRETE_INPUTS],
    input: [u16; NUM_INPUT_REGISTERS],
    holding: [u16; NUM_HOLDING_REGISTERS],
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterMap {
    pub fn new() -> Self {
        Self {
            coils: [false; NUM_COILS],
            discrete: [false; NUM_DISCRETE_INPUTS],
            input: [0; NUM_INPUT_REGISTERS],
            holding: [0; NUM_HOLDING_REGISTERS],
        }
    }

    /// Decode the command coils into the scan-cycle input.
    pub fn coil_snapshot(&self) -> CoilSnapshot {
        CoilSnapshot {
            intake_cmd: self.coils[co::INTAKE_CMD],
            alum_cmd: self.coils[co::ALUM_CMD],
            cl2_cmd: self.coils[co::CL2_CMD],
            bw_cmd: self.coils[co::BW_CMD],
            auto_mode: self.coils[co::AUTO_MODE],
            estop: self.coils[co::ESTOP],
            alarm_ack: self.coils[co::ALARM_ACK],
            turb_shutdown_cmd: self.coils[co::TURB_SHUTDOWN],
        }
    }

    /// Raw coil bank copy, for edge detection by the command logger.
    pub fn coils(&self) -> [bool; NUM_COILS] {
        self.coils
    }

    /// Write one coil, rejecting out-of-range indices without mutating
    /// anything.
    pub fn set_coil(&mut self, index: usize, value: bool) -> Result<()> {
        if index >= NUM_COILS {
            bail!("coil index {index} out of range (0..{NUM_COILS})");
        }
        self.coils[index] = value;
        Ok(())
    }

    /// Publish one scan's results: rebuild the holding, discrete-input and
    /// input-register banks from the sensor vector and derived values.
    pub fn apply_scan(&mut self, sensors: &SensorVector, result: &ScanResult) {
        let mut holding = [0u16; NUM_HOLDING_REGISTERS];
        holding[hr::TURB_RAW] = encode(sensors.turb_raw, 10.0);
        holding[hr::TURB_FILTERED] = encode(result.turb_filtered, 100.0);
        holding[hr::PH] = encode(sensors.ph, 100.0);
        holding[hr::CL2] = encode(sensors.cl2, 100.0);
        holding[hr::FLOW_RAW] = encode(sensors.flow_raw, 10.0);
        holding[hr::FLOW_TREATED] = encode(result.flow_treated, 10.0);
        holding[hr::LEVEL_PCT] = encode(sensors.level_pct, 10.0);
        holding[hr::TEMP] = encode(sensors.temp, 10.0);
        holding[hr::FILTER_DP] = encode(result.filter_dp, 10.0);
        holding[hr::BW_COUNT] = result.backwash_count.min(u16::MAX as u32) as u16;
        holding[hr::TOTAL_FLOW] = encode(result.total_flow_ml, 1.0);
        holding[hr::RUNTIME] = encode(result.runtime_hours, 1.0);
        self.holding = holding;

        let mut discrete = [false; NUM_DISCRETE_INPUTS];
        discrete[di::INTAKE_RUN] = sensors.p_intake;
        discrete[di::ALUM_RUN] = sensors.p_alum;
        discrete[di::CL2_RUN] = sensors.p_cl2;
        discrete[di::BW_OPEN] = sensors.v_bw;
        discrete[di::LEVEL_HIGH] = sensors.lvl_hi;
        discrete[di::LEVEL_LOW] = sensors.lvl_lo;
        discrete[di::BW_ACTIVE] = result.plant_status == PlantStatus::Backwash;
        discrete[di::ALM_TURB] = result.turb_shutdown;
        discrete[di::ALM_CL2] = sensors.cl2 < CL2_LOW;
        // A sensor vector reached us, so the comm-fault flag stays clear.
        discrete[di::COMM_FAULT] = false;
        self.discrete = discrete;

        let mut input = [0u16; NUM_INPUT_REGISTERS];
        input[ir::TURB_BACKUP] = encode(sensors.turb_raw, 10.0);
        input[ir::PLANT_STATUS] = result.plant_status.code();
        input[ir::ALARM_WORD] = result.alarm_word;
        self.input = input;
    }

    // -- Fieldbus bank access ----------------------------------------------
    // `None` means the requested range does not fit the bank; the transport
    // answers IllegalDataAddress.

    pub fn read_coils(&self, addr: u16, cnt: u16) -> Option<Vec<bool>> {
        read_range(&self.coils, addr, cnt)
    }

    pub fn read_discrete_inputs(&self, addr: u16, cnt: u16) -> Option<Vec<bool>> {
        read_range(&self.discrete, addr, cnt)
    }

    pub fn read_input_registers(&self, addr: u16, cnt: u16) -> Option<Vec<u16>> {
        read_range(&self.input, addr, cnt)
    }

    pub fn read_holding_registers(&self, addr: u16, cnt: u16) -> Option<Vec<u16>> {
        read_range(&self.holding, addr, cnt)
    }

    pub fn write_coils(&mut self, addr: u16, values: &[bool]) -> Option<()> {
        write_range(&mut self.coils, addr, values)
    }

    pub fn write_holding_registers(&mut self, addr: u16, values: &[u16]) -> Option<()> {
        write_range(&mut self.holding, addr, values)
    }
}

fn read_range<T: Copy>(bank: &[T], addr: u16, cnt: u16) -> Option<Vec<T>> {
    let start = addr as usize;
    let end = start.checked_add(cnt as usize)?;
    bank.get(start..end).map(<[T]>::to_vec)
}

fn write_range<T: Copy>(bank: &mut [T], addr: u16, values: &[T]) -> Option<()> {
    let start = addr as usize;
    let end = start.checked_add(values.len())?;
    bank.get_mut(start..end)?.copy_from_slice(values);
    Some(())
}

// ===========================================================================
// Tests
// ===========================================================================
