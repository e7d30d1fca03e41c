use crate::error::{SimError, SimResult};
use crate::parse::hdl::ChipDef;

use std::collections::{HashMap, VecDeque};

/// Pin and wire storage for one chip instance: current value and declared
/// width per name.
pub struct PinMap {
    chip_name: String,
    values: HashMap<String, i64>,
    widths: HashMap<String, u8>,
}

impl PinMap {
    fn new(chip_name: &str) -> Self {
        Self {
            chip_name: chip_name.to_string(),
            values: HashMap::new(),
            widths: HashMap::new(),
        }
    }

    fn insert(&mut self, name: &str, width: u8) {
        self.values.insert(name.to_string(), 0);
        self.widths.insert(name.to_string(), width);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn width(&self, name: &str) -> Option<u8> {
        self.widths.get(name).copied()
    }

    pub fn get(&self, name: &str) -> SimResult<i64> {
        self.values.get(name).copied().ok_or_else(|| {
            SimError::runtime(format!(
                "Unknown pin: '{}' on chip {}",
                name, self.chip_name
            ))
        })
    }

    pub fn set(&mut self, name: &str, value: i64) -> SimResult {
        match self.values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(SimError::runtime(format!(
                "Unknown pin: '{}' on chip {}",
                name, self.chip_name
            ))),
        }
    }

    /// Read bits [lo, hi] of a pin as a contiguous field. lo < 0 reads the
    /// full pin.
    pub fn get_bits(&self, name: &str, lo: i32, hi: i32) -> SimResult<i64> {
        let value = self.get(name)?;
        if lo < 0 {
            return Ok(value);
        }
        let mask = (1i64 << (hi - lo + 1)) - 1;
        Ok((value >> lo) & mask)
    }

    /// Write bits [lo, hi] of a pin; bits outside the range are preserved.
    pub fn set_bits(&mut self, name: &str, lo: i32, hi: i32, value: i64) -> SimResult {
        if lo < 0 {
            return self.set(name, value);
        }
        let current = self.get(name)?;
        let width = hi - lo + 1;
        let mask = (1i64 << width) - 1;
        let merged = (current & !(mask << lo)) | ((value & mask) << lo);
        self.set(name, merged)
    }

    fn zero_all(&mut self) {
        for value in self.values.values_mut() {
            *value = 0;
        }
    }
}

/// Private state of a sequential builtin: `regs` is the committed state,
/// `pending` holds whatever tick sampled until tock commits it.
#[derive(Debug, Default, Clone)]
pub struct SeqState {
    pub regs: Vec<i64>,
    pub pending: Vec<i64>,
}

impl SeqState {
    pub fn with_shape(regs: usize, pending: usize) -> Self {
        Self {
            regs: vec![0; regs],
            pending: vec![0; pending],
        }
    }

    fn zero(&mut self) {
        self.regs.iter_mut().for_each(|r| *r = 0);
        self.pending.iter_mut().for_each(|r| *r = 0);
    }
}

pub type PinFn = fn(&mut PinMap, &mut SeqState) -> SimResult;

/// Produces child chip instances by name during composite construction.
/// `Ok(None)` means the name is unknown to this resolver.
pub trait Resolve {
    fn resolve(&mut self, name: &str) -> SimResult<Option<Chip>>;
}

/// A single wire binding between an outer pin/wire and a sub-chip pin.
/// `chip_pin` may be the literal constant `true` or `false`.
#[derive(Debug, Clone)]
struct WireMapping {
    part_index: usize,
    part_pin: String,
    part_lo: i32,
    part_hi: i32,
    chip_pin: String,
    chip_lo: i32,
    chip_hi: i32,
}

enum Backend {
    Builtin {
        eval: PinFn,
        tick: Option<PinFn>,
        tock: Option<PinFn>,
        state: SeqState,
    },
    Composite {
        parts: Vec<Chip>,
        eval_order: Vec<usize>,
        input_mappings: Vec<WireMapping>,
        output_mappings: Vec<WireMapping>,
    },
}

/// A runtime chip instance. Built once from a definition, then mutated only
/// through pin writes and eval/tick/tock.
pub struct Chip {
    def: ChipDef,
    pins: PinMap,
    backend: Backend,
}

impl Chip {
    // =========================================================================
    // Construction
    // =========================================================================

    pub fn builtin(
        def: ChipDef,
        eval: PinFn,
        tick: Option<PinFn>,
        tock: Option<PinFn>,
        state: SeqState,
    ) -> Self {
        let mut pins = PinMap::new(&def.name);
        for port in def.inputs.iter().chain(def.outputs.iter()) {
            pins.insert(&port.name, port.width);
        }

        Self {
            def,
            pins,
            backend: Backend::Builtin {
                eval,
                tick,
                tock,
                state,
            },
        }
    }

    pub fn composite(def: ChipDef, resolver: &mut dyn Resolve) -> SimResult<Self> {
        let mut pins = PinMap::new(&def.name);
        for port in def.inputs.iter().chain(def.outputs.iter()) {
            pins.insert(&port.name, port.width);
        }

        let mut parts: Vec<Chip> = Vec::with_capacity(def.parts.len());
        let mut input_mappings = Vec::new();
        let mut output_mappings = Vec::new();

        for (part_index, part) in def.parts.iter().enumerate() {
            let mut sub = resolver.resolve(&part.chip_name)?.ok_or_else(|| {
                SimError::runtime(format!(
                    "Unknown chip: '{}' at line {}",
                    part.chip_name, part.source_line
                ))
            })?;

            for conn in &part.connections {
                let internal = &conn.internal;
                let external = &conn.external;

                let is_part_input = sub.def.inputs.iter().any(|p| p.name == internal.name);

                let mapping = WireMapping {
                    part_index,
                    part_pin: internal.name.clone(),
                    part_lo: internal.lo,
                    part_hi: internal.hi,
                    chip_pin: external.name.clone(),
                    chip_lo: external.lo,
                    chip_hi: external.hi,
                };

                // true/false are constants: the value is written once here
                // and re-asserted on every eval
                if external.name == "true" || external.name == "false" {
                    let value = constant_value(external.name == "true", &sub, internal);
                    sub.pins
                        .set_bits(&internal.name, internal.lo, internal.hi, value)?;
                    input_mappings.push(mapping);
                    continue;
                }

                // external references that are neither chip inputs nor chip
                // outputs are internal wires; their width comes from the
                // connected sub-chip pin
                if !pins.contains(&external.name) {
                    let width = sub.pins.width(&internal.name).unwrap_or(1);
                    pins.insert(&external.name, width);
                }

                if is_part_input {
                    input_mappings.push(mapping);
                } else {
                    output_mappings.push(mapping);
                }
            }

            parts.push(sub);
        }

        let eval_order = compute_eval_order(&def, &parts, &input_mappings, &output_mappings);

        Ok(Self {
            def,
            pins,
            backend: Backend::Composite {
                parts,
                eval_order,
                input_mappings,
                output_mappings,
            },
        })
    }

    // =========================================================================
    // Pin access
    // =========================================================================

    pub fn def(&self) -> &ChipDef {
        &self.def
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn get_pin(&self, name: &str) -> SimResult<i64> {
        self.pins.get(name)
    }

    pub fn set_pin(&mut self, name: &str, value: i64) -> SimResult {
        self.pins.set(name, value)
    }

    pub fn get_pin_bits(&self, name: &str, lo: i32, hi: i32) -> SimResult<i64> {
        self.pins.get_bits(name, lo, hi)
    }

    pub fn set_pin_bits(&mut self, name: &str, lo: i32, hi: i32, value: i64) -> SimResult {
        self.pins.set_bits(name, lo, hi, value)
    }

    pub fn pin_width(&self, name: &str) -> Option<u8> {
        self.pins.width(name)
    }

    pub fn reset(&mut self) {
        self.pins.zero_all();
        match &mut self.backend {
            Backend::Builtin { state, .. } => state.zero(),
            Backend::Composite { parts, .. } => {
                for part in parts {
                    part.reset();
                }
            }
        }
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Combinational settle. For sequential builtins this only reflects the
    /// stored state onto the outputs; it never changes state.
    pub fn eval(&mut self) -> SimResult {
        match &mut self.backend {
            Backend::Builtin { eval, state, .. } => eval(&mut self.pins, state),
            Backend::Composite {
                parts,
                eval_order,
                input_mappings,
                output_mappings,
            } => {
                for &idx in eval_order.iter() {
                    propagate_inputs(&mut self.pins, parts, input_mappings, idx)?;
                    parts[idx].eval()?;
                    collect_outputs(&mut self.pins, parts, output_mappings, idx)?;
                }
                Ok(())
            }
        }
    }

    /// Rising clock edge: sample inputs into pending state.
    pub fn tick(&mut self) -> SimResult {
        // settle combinational paths so every sequential part samples
        // current values
        self.eval()?;

        match &mut self.backend {
            Backend::Builtin { tick, state, .. } => match tick {
                Some(tick) => tick(&mut self.pins, state),
                None => Ok(()),
            },
            Backend::Composite { parts, .. } => {
                for part in parts {
                    part.tick()?;
                }
                Ok(())
            }
        }
    }

    /// Falling clock edge: commit pending state and refresh outputs.
    pub fn tock(&mut self) -> SimResult {
        let needs_settle = match &mut self.backend {
            Backend::Builtin { tock, state, .. } => {
                if let Some(tock) = tock {
                    tock(&mut self.pins, state)?;
                }
                false
            }
            Backend::Composite { parts, .. } => {
                for part in parts.iter_mut() {
                    part.tock()?;
                }
                true
            }
        };

        // propagate the committed values through the net
        if needs_settle {
            self.eval()?;
        }
        Ok(())
    }
}

fn constant_value(is_true: bool, sub: &Chip, internal: &crate::parse::hdl::PinRef) -> i64 {
    if !is_true {
        return 0;
    }
    // `true` on a wide pin is all-ones of the connected width
    let width = if internal.lo >= 0 {
        (internal.hi - internal.lo + 1) as u8
    } else {
        sub.pins.width(&internal.name).unwrap_or(1)
    };
    if width > 1 {
        (1i64 << width) - 1
    } else {
        1
    }
}

fn propagate_inputs(
    pins: &mut PinMap,
    parts: &mut [Chip],
    mappings: &[WireMapping],
    part_index: usize,
) -> SimResult {
    for m in mappings.iter().filter(|m| m.part_index == part_index) {
        if m.chip_pin == "true" || m.chip_pin == "false" {
            let part = &parts[part_index];
            let value = if m.chip_pin == "true" {
                let width = if m.part_lo >= 0 {
                    (m.part_hi - m.part_lo + 1) as u8
                } else {
                    part.pins.width(&m.part_pin).unwrap_or(1)
                };
                if width > 1 {
                    (1i64 << width) - 1
                } else {
                    1
                }
            } else {
                0
            };
            parts[part_index]
                .pins
                .set_bits(&m.part_pin, m.part_lo, m.part_hi, value)?;
            continue;
        }

        let value = pins.get_bits(&m.chip_pin, m.chip_lo, m.chip_hi)?;
        parts[part_index]
            .pins
            .set_bits(&m.part_pin, m.part_lo, m.part_hi, value)?;
    }
    Ok(())
}

fn collect_outputs(
    pins: &mut PinMap,
    parts: &mut [Chip],
    mappings: &[WireMapping],
    part_index: usize,
) -> SimResult {
    for m in mappings.iter().filter(|m| m.part_index == part_index) {
        let value = parts[part_index]
            .pins
            .get_bits(&m.part_pin, m.part_lo, m.part_hi)?;
        pins.set_bits(&m.chip_pin, m.chip_lo, m.chip_hi, value)?;
    }
    Ok(())
}

/// Kahn's algorithm over the wire graph: part a precedes part b whenever a
/// writes an internal wire b reads. Falls back to source order if the graph
/// has a cycle.
fn compute_eval_order(
    def: &ChipDef,
    parts: &[Chip],
    input_mappings: &[WireMapping],
    output_mappings: &[WireMapping],
) -> Vec<usize> {
    let n = parts.len();
    if n == 0 {
        return Vec::new();
    }

    let is_boundary = |name: &str| {
        def.inputs.iter().any(|p| p.name == name) || def.outputs.iter().any(|p| p.name == name)
    };

    let mut writers: Vec<Vec<&str>> = vec![Vec::new(); n];
    for m in output_mappings {
        if !is_boundary(&m.chip_pin) {
            writers[m.part_index].push(&m.chip_pin);
        }
    }

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree: Vec<usize> = vec![0; n];

    for m in input_mappings {
        if m.chip_pin == "true" || m.chip_pin == "false" || is_boundary(&m.chip_pin) {
            continue;
        }
        let reader = m.part_index;
        for (writer, wires) in writers.iter().enumerate() {
            if writer != reader && wires.iter().any(|w| *w == m.chip_pin) {
                adjacency[writer].push(reader);
                in_degree[reader] += 1;
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(u) = queue.pop_front() {
        order.push(u);
        for &v in &adjacency[u] {
            in_degree[v] -= 1;
            if in_degree[v] == 0 {
                queue.push_back(v);
            }
        }
    }

    if order.len() != n {
        // cycle in the wire graph; fall back to source order
        return (0..n).collect();
    }

    order
}
