//! Call tracing
//!
//! A revm inspector that records a depth-annotated frame per call, create,
//! log emission, and return. The frames double as the stored per-transaction
//! trace and as a human-readable rendering for debugging. Observation only:
//! the tracer never touches the backing state.

use alloy_primitives::{hex, Address, Bytes, Log, U256};
use revm::{
    context::ContextTr,
    interpreter::{
        CallInput, CallInputs, CallOutcome, CallScheme, CreateInputs, CreateOutcome, CreateScheme,
        Interpreter, InterpreterTypes,
    },
    Inspector,
};
use smelter_primitives::{TraceFrame, TransactionTraces};

/// Frame-collecting inspector.
#[derive(Debug, Default)]
pub struct CallTracer {
    frames: Vec<TraceFrame>,
    depth: u64,
    gas_at_depth: Vec<u64>,
}

fn hex_value(value: U256) -> String {
    format!("{value:#x}")
}

fn call_kind(scheme: CallScheme) -> &'static str {
    match scheme {
        CallScheme::Call => "CALL",
        CallScheme::CallCode => "CALLCODE",
        CallScheme::DelegateCall => "DELEGATECALL",
        CallScheme::StaticCall => "STATICCALL",
    }
}

impl CallTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The collected frames, cloned for storage next to a receipt.
    pub fn traces(&self) -> TransactionTraces {
        self.frames.clone()
    }

    /// Indented rendering for log output.
    pub fn fmt(&self) -> String {
        let mut out = String::new();
        for frame in &self.frames {
            let arrow = if frame.from.is_empty() && frame.to.is_empty() {
                String::new()
            } else {
                format!("{} => {}", frame.from, frame.to)
            };
            out.push_str(&format!(
                "\n{}[{}] {} [{}] ({})",
                "\t".repeat(frame.depth as usize),
                frame.kind,
                arrow,
                frame.value,
                if frame.kind == "RETURN" { &frame.output } else { &frame.input },
            ));
        }
        out
    }

    fn open_frame(
        &mut self,
        kind: &str,
        from: Address,
        to: String,
        value: U256,
        input: &[u8],
        gas: u64,
    ) {
        self.frames.push(TraceFrame {
            kind: kind.to_string(),
            depth: self.depth,
            from: from.to_string(),
            to,
            value: hex_value(value),
            input: hex::encode_prefixed(input),
            output: "0x".to_string(),
        });
        self.depth += 1;
        self.gas_at_depth.push(gas);
    }

    fn close_frame(&mut self, output: &Bytes, gas_remaining: u64, reverted: bool) {
        let gas_used = self.gas_at_depth.pop().unwrap_or(0).saturating_sub(gas_remaining);
        self.depth = self.depth.saturating_sub(1);
        self.frames.push(TraceFrame {
            kind: "RETURN".to_string(),
            depth: self.depth,
            from: String::new(),
            to: String::new(),
            value: String::new(),
            input: String::new(),
            output: format!(
                "{} ({gas_used}) REVERTED: {reverted}",
                hex::encode_prefixed(output.as_ref())
            ),
        });
    }
}

impl<CTX: ContextTr, INTR: InterpreterTypes> Inspector<CTX, INTR> for CallTracer {
    fn call(&mut self, _ctx: &mut CTX, inputs: &mut CallInputs) -> Option<CallOutcome> {
        let input = match &inputs.input {
            CallInput::Bytes(bytes) => bytes.to_vec(),
            CallInput::SharedBuffer(_) => Vec::new(),
        };
        self.open_frame(
            call_kind(inputs.scheme),
            inputs.caller,
            inputs.target_address.to_string(),
            inputs.value.get(),
            &input,
            inputs.gas_limit,
        );
        None
    }

    fn call_end(&mut self, _ctx: &mut CTX, _inputs: &CallInputs, outcome: &mut CallOutcome) {
        let reverted = !outcome.result.is_ok();
        let output = outcome.result.output.clone();
        let remaining = outcome.gas().remaining();
        self.close_frame(&output, remaining, reverted);
    }

    fn create(&mut self, _ctx: &mut CTX, inputs: &mut CreateInputs) -> Option<CreateOutcome> {
        let kind = match inputs.scheme {
            CreateScheme::Create2 { .. } => "CREATE2",
            _ => "CREATE",
        };
        self.open_frame(
            kind,
            inputs.caller,
            String::new(),
            inputs.value,
            &inputs.init_code,
            inputs.gas_limit,
        );
        None
    }

    fn create_end(&mut self, _ctx: &mut CTX, _inputs: &CreateInputs, outcome: &mut CreateOutcome) {
        let reverted = !outcome.result.is_ok();
        let output = outcome.result.output.clone();
        let remaining = outcome.gas().remaining();
        self.close_frame(&output, remaining, reverted);
    }

    fn log(&mut self, _interp: &mut Interpreter<INTR>, _ctx: &mut CTX, log: Log) {
        self.frames.push(TraceFrame {
            kind: "EMIT".to_string(),
            depth: self.depth,
            from: log.address.to_string(),
            to: Address::ZERO.to_string(),
            value: String::new(),
            input: hex::encode_prefixed(log.data.data.as_ref()),
            output: "0x".to_string(),
        });
    }
}
