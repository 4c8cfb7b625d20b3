//! On-disk format of the sample driver's compilation cache.
//!
//! Model cache layout:
//!
//! ```text
//! magic (8) | token (32) | payload length (u32 LE) | payload | tag (32)
//! ```
//!
//! `tag = SHA-256(key || SHA-256(payload || token))` where `key` is the
//! driver's secret. The payload is the model structure without constant
//! bytes. A mismatched token, a wrong tag, or trailing bytes reject the whole
//! file before any of it is parsed.
//!
//! The data cache holds the constant payloads as `(operand, length, bytes)`
//! records. It is not authenticated, but every record must fill a constant the
//! model cache declared and every declared constant must be filled. Altered
//! bytes change results, nothing more.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use tessera_hal::{
    CACHE_TOKEN_LEN, CacheToken, Model, Operand, OperandLifetime, OperandType, OperationType,
};

const MAGIC: &[u8; 8] = b"TSRAMC01";
const TAG_LEN: usize = 32;

/// Secret key authenticating model caches written by one driver instance.
pub type CacheKey = [u8; 32];

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache file is truncated")]
    Truncated,

    #[error("Cache file has an unknown header")]
    BadMagic,

    #[error("Cache token does not match")]
    TokenMismatch,

    #[error("Model cache failed its integrity check")]
    IntegrityCheckFailed,

    #[error("Unknown {kind} code {code} in cache")]
    UnknownCode { kind: &'static str, code: u32 },

    #[error("Data cache does not match the model: {0}")]
    DataMismatch(String),
}

type Result<T> = std::result::Result<T, CacheError>;

fn tag(key: &CacheKey, payload: &[u8], token: &CacheToken) -> [u8; TAG_LEN] {
    let mut inner = Sha256::new();
    inner.update(payload);
    inner.update(token);
    let inner = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(key);
    outer.update(inner);
    outer.finalize().into()
}

fn tags_equal(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Serialize the model structure and frame it for the model cache.
pub fn encode_model_cache(model: &Model, token: &CacheToken, key: &CacheKey) -> Vec<u8> {
    let payload = encode_structure(model);
    let mut out = Vec::with_capacity(MAGIC.len() + CACHE_TOKEN_LEN + 4 + payload.len() + TAG_LEN);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(token);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&tag(key, &payload, token));
    out
}

/// Serialize the constant payloads of `model`.
pub fn encode_data_cache(model: &Model) -> Vec<u8> {
    let constants: Vec<(u32, &Arc<[u8]>)> = model
        .operands()
        .iter()
        .enumerate()
        .filter_map(|(i, operand)| operand.value.as_ref().map(|value| (i as u32, value)))
        .collect();

    let mut writer = Writer::default();
    writer.u32(constants.len() as u32);
    for (index, value) in constants {
        writer.u32(index);
        writer.u32(value.len() as u32);
        writer.bytes(value);
    }
    writer.finish()
}

/// Verify and decode a model cache, then attach constants from the data cache.
pub fn decode(
    model_cache: &[u8],
    data_cache: &[u8],
    token: &CacheToken,
    key: &CacheKey,
) -> Result<Model> {
    let payload = verify_model_cache(model_cache, token, key)?;
    let mut model = decode_structure(payload)?;
    attach_constants(&mut model, data_cache)?;
    Ok(model)
}

fn verify_model_cache<'a>(bytes: &'a [u8], token: &CacheToken, key: &CacheKey) -> Result<&'a [u8]> {
    let mut reader = Reader::new(bytes);
    if reader.take(MAGIC.len())? != MAGIC {
        return Err(CacheError::BadMagic);
    }
    if reader.take(CACHE_TOKEN_LEN)? != token {
        return Err(CacheError::TokenMismatch);
    }
    let len = reader.u32()? as usize;
    let payload = reader.take(len)?;
    let stored = reader.take(TAG_LEN)?;
    if !reader.is_empty() {
        return Err(CacheError::IntegrityCheckFailed);
    }
    if !tags_equal(stored, &tag(key, payload, token)) {
        return Err(CacheError::IntegrityCheckFailed);
    }
    Ok(payload)
}

fn lifetime_code(lifetime: OperandLifetime) -> u8 {
    match lifetime {
        OperandLifetime::TemporaryVariable => 0,
        OperandLifetime::ModelInput => 1,
        OperandLifetime::ModelOutput => 2,
        OperandLifetime::ConstantCopy => 3,
        OperandLifetime::ConstantReference => 4,
        OperandLifetime::NoValue => 5,
    }
}

fn lifetime_from_code(code: u8) -> Result<OperandLifetime> {
    Ok(match code {
        0 => OperandLifetime::TemporaryVariable,
        1 => OperandLifetime::ModelInput,
        2 => OperandLifetime::ModelOutput,
        3 => OperandLifetime::ConstantCopy,
        4 => OperandLifetime::ConstantReference,
        5 => OperandLifetime::NoValue,
        other => {
            return Err(CacheError::UnknownCode {
                kind: "lifetime",
                code: other as u32,
            });
        }
    })
}

fn encode_structure(model: &Model) -> Vec<u8> {
    let mut writer = Writer::default();

    writer.u32(model.operands().len() as u32);
    for operand in model.operands() {
        writer.u32(operand.operand_type.code());
        writer.list(&operand.dimensions);
        writer.u32(operand.scale.to_bits());
        writer.u32(operand.zero_point as u32);
        writer.u8(lifetime_code(operand.lifetime));
    }

    writer.u32(model.operations().len() as u32);
    for operation in model.operations() {
        writer.u32(operation.operation_type.code());
        writer.list(&operation.inputs);
        writer.list(&operation.outputs);
    }

    writer.list(model.input_indexes());
    writer.list(model.output_indexes());
    writer.u8(model.is_relaxed() as u8);
    writer.finish()
}

fn decode_structure(bytes: &[u8]) -> Result<Model> {
    let mut reader = Reader::new(bytes);
    let mut model = Model::new();
    let mut lifetimes = Vec::new();

    for _ in 0..reader.u32()? {
        let code = reader.u32()?;
        let operand_type = OperandType::from_code(code).ok_or(CacheError::UnknownCode {
            kind: "operand type",
            code,
        })?;
        let dimensions = reader.list()?;
        let scale = f32::from_bits(reader.u32()?);
        let zero_point = reader.u32()? as i32;
        let lifetime = lifetime_from_code(reader.u8()?)?;
        lifetimes.push(lifetime);
        let mut operand = Operand::new(operand_type, dimensions).with_quantization(scale, zero_point);
        if lifetime.is_constant() {
            // Bytes come from the data cache.
            operand.lifetime = lifetime;
        }
        model.add_operand(operand);
    }

    for _ in 0..reader.u32()? {
        let code = reader.u32()?;
        let operation_type = OperationType::from_code(code).ok_or(CacheError::UnknownCode {
            kind: "operation type",
            code,
        })?;
        let inputs = reader.list()?;
        let outputs = reader.list()?;
        model
            .add_operation(operation_type, inputs, outputs)
            .map_err(|e| CacheError::DataMismatch(e.to_string()))?;
    }

    let inputs = reader.list()?;
    let outputs = reader.list()?;
    model
        .identify_inputs_and_outputs(inputs, outputs)
        .map_err(|e| CacheError::DataMismatch(e.to_string()))?;
    model.set_relax_computation_float32_to_float16(reader.u8()? != 0);

    for (index, lifetime) in lifetimes.into_iter().enumerate() {
        if lifetime == OperandLifetime::NoValue {
            model
                .set_operand_no_value(index as u32)
                .map_err(|e| CacheError::DataMismatch(e.to_string()))?;
        }
    }
    Ok(model)
}

/// Fill the constants recorded by the model cache, and nothing else.
fn attach_constants(model: &mut Model, bytes: &[u8]) -> Result<()> {
    let mut reader = Reader::new(bytes);
    for _ in 0..reader.u32()? {
        let index = reader.u32()?;
        let len = reader.u32()? as usize;
        let value = reader.take(len)?.to_vec();

        let operand = model
            .operand(index)
            .map_err(|e| CacheError::DataMismatch(e.to_string()))?;
        if !operand.is_constant() {
            return Err(CacheError::DataMismatch(format!(
                "operand {index} is not a constant"
            )));
        }
        if operand.value.is_some() {
            return Err(CacheError::DataMismatch(format!(
                "operand {index} is stored twice"
            )));
        }
        let lifetime = operand.lifetime;
        let attached = match lifetime {
            OperandLifetime::ConstantReference => model.set_operand_reference(index, value),
            _ => model.set_operand_value(index, value),
        };
        attached.map_err(|e| CacheError::DataMismatch(e.to_string()))?;
    }
    if !reader.is_empty() {
        return Err(CacheError::DataMismatch("trailing bytes".to_string()));
    }

    let missing = model
        .operands()
        .iter()
        .position(|operand| operand.is_constant() && operand.value.is_none());
    if let Some(index) = missing {
        return Err(CacheError::DataMismatch(format!(
            "constant operand {index} has no value"
        )));
    }
    Ok(())
}

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn list(&mut self, values: &[u32]) {
        self.u32(values.len() as u32);
        for &value in values {
            self.u32(value);
        }
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.bytes.len() < len {
            return Err(CacheError::Truncated);
        }
        let (head, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn list(&mut self) -> Result<Vec<u32>> {
        let len = self.u32()?;
        (0..len).map(|_| self.u32()).collect()
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
