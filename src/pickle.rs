//! Just enough pickle support to read the CIFAR Python batch files.
//!
//! The batches are dictionaries written by Python's `pickle` module (protocol 2
//! under Python 2 for the upstream files) holding a numpy `uint8` array and a
//! list of integer labels. This module runs the pickle stack machine for the
//! opcodes such files use and rebuilds numpy arrays from their
//! `_reconstruct` + `BUILD` encoding. Arbitrary Python objects are kept as
//! opaque [`Value::Reduce`] / [`Value::Build`] nodes, never executed.
//!
//! Supported input is protocol 2-4 numpy pickles, as written by Python 2's
//! `cPickle` and Python 3's `pickle`. The protocol 0/1 text opcodes and
//! protocol 5 out-of-band buffers (`numpy.core.numeric._frombuffer`) are not
//! implemented.

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::{self, BufRead, Read};
use thiserror::Error;

/// Error raised while decoding a pickle stream
#[derive(Debug, Error)]
pub enum PickleError {
    /// Underlying reader failed (including unexpected end of file)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Byte is not a pickle opcode this reader understands
    #[error("invalid pickle opcode 0x{0:02x}")]
    InvalidOpCode(u8),

    /// Protocol newer than 5
    #[error("unsupported pickle protocol {0}")]
    InvalidProtocol(u8),

    /// Opcode is valid but cannot apply to the current stack
    #[error("unexpected opcode {0:?} in current context")]
    UnexpectedOpCode(OpCode),

    /// Pop from an empty stack
    #[error("pickle stack underflow")]
    StackUnderflow,

    /// Tuple/list/dict construction without a preceding MARK
    #[error("pickle mark not found")]
    MarkNotFound,

    /// Memo reference to a slot that was never stored
    #[error("pickle memo entry {0} not found")]
    MemoNotFound(u32),

    /// Structurally valid pickle with unexpected content
    #[error("invalid pickle data: {0}")]
    InvalidData(String),
}

type Result<T> = std::result::Result<T, PickleError>;

/// Pickle opcodes handled by [`read_pickle`]
#[allow(missing_docs)]
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum OpCode {
    Proto = 0x80,
    Frame = 0x95,
    Stop = b'.',
    Mark = b'(',
    Global = b'c',
    StackGlobal = 0x93,
    Put = b'p',
    BinPut = b'q',
    LongBinPut = b'r',
    Memoize = 0x94,
    Get = b'g',
    BinGet = b'h',
    LongBinGet = b'j',
    None = b'N',
    NewTrue = 0x88,
    NewFalse = 0x89,
    Int = b'I',
    BinInt = b'J',
    BinInt1 = b'K',
    BinInt2 = b'M',
    Long1 = 0x8a,
    Long4 = 0x8b,
    BinFloat = b'G',
    ShortBinString = b'U',
    BinString = b'T',
    ShortBinBytes = b'C',
    BinBytes = b'B',
    BinBytes8 = 0x8e,
    ByteArray8 = 0x96,
    ShortBinUnicode = 0x8c,
    BinUnicode = b'X',
    BinUnicode8 = 0x8d,
    EmptyTuple = b')',
    Tuple = b't',
    Tuple1 = 0x85,
    Tuple2 = 0x86,
    Tuple3 = 0x87,
    EmptyList = b']',
    List = b'l',
    Append = b'a',
    Appends = b'e',
    EmptyDict = b'}',
    Dict = b'd',
    SetItem = b's',
    SetItems = b'u',
    Reduce = b'R',
    NewObj = 0x81,
    Build = b'b',
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        let op = match value {
            0x80 => Self::Proto,
            0x95 => Self::Frame,
            b'.' => Self::Stop,
            b'(' => Self::Mark,
            b'c' => Self::Global,
            0x93 => Self::StackGlobal,
            b'p' => Self::Put,
            b'q' => Self::BinPut,
            b'r' => Self::LongBinPut,
            0x94 => Self::Memoize,
            b'g' => Self::Get,
            b'h' => Self::BinGet,
            b'j' => Self::LongBinGet,
            b'N' => Self::None,
            0x88 => Self::NewTrue,
            0x89 => Self::NewFalse,
            b'I' => Self::Int,
            b'J' => Self::BinInt,
            b'K' => Self::BinInt1,
            b'M' => Self::BinInt2,
            0x8a => Self::Long1,
            0x8b => Self::Long4,
            b'G' => Self::BinFloat,
            b'U' => Self::ShortBinString,
            b'T' => Self::BinString,
            b'C' => Self::ShortBinBytes,
            b'B' => Self::BinBytes,
            0x8e => Self::BinBytes8,
            0x96 => Self::ByteArray8,
            0x8c => Self::ShortBinUnicode,
            b'X' => Self::BinUnicode,
            0x8d => Self::BinUnicode8,
            b')' => Self::EmptyTuple,
            b't' => Self::Tuple,
            0x85 => Self::Tuple1,
            0x86 => Self::Tuple2,
            0x87 => Self::Tuple3,
            b']' => Self::EmptyList,
            b'l' => Self::List,
            b'a' => Self::Append,
            b'e' => Self::Appends,
            b'}' => Self::EmptyDict,
            b'd' => Self::Dict,
            b's' => Self::SetItem,
            b'u' => Self::SetItems,
            b'R' => Self::Reduce,
            0x81 => Self::NewObj,
            b'b' => Self::Build,
            other => return Err(other),
        };
        Ok(op)
    }
}

/// A rebuilt numpy array
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    /// Dimensions, outermost first
    pub shape: Vec<usize>,
    /// numpy type code without byte order, e.g. `u1`
    pub dtype: String,
    /// Whether `data` is column-major
    pub fortran_order: bool,
    /// Raw element bytes
    pub data: Vec<u8>,
}

/// A decoded pickle value
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Python 2 `str` or Python 3 `bytes`
    Bytes(Vec<u8>),
    /// Unicode text
    String(String),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    Dict(HashMap<String, Value>),
    /// Reference to a global (`module.name`)
    Class { module: String, name: String },
    /// Call of `callable` with `args`, left unevaluated
    Reduce {
        callable: Box<Value>,
        args: Box<Value>,
    },
    /// `object.__setstate__(state)`, left unevaluated
    Build { object: Box<Value>, state: Box<Value> },
    NdArray(NdArray),
    /// numpy dtype, type code only
    Dtype(String),
}

impl Value {
    /// Look up a key when this value is a dict
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(map) => map.get(key),
            _ => None,
        }
    }

    /// Integer value, if any
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Text of a `String`, or of `Bytes` decoded as latin-1
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Bytes(b) => Some(latin1(b)),
            _ => None,
        }
    }

    /// Items of a list or tuple
    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    fn is_class(&self, modules: &[&str], class_name: &str) -> bool {
        matches!(self, Value::Class { module, name }
            if name == class_name && modules.contains(&module.as_str()))
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

const NUMPY_MULTIARRAY: &[&str] = &["numpy.core.multiarray", "numpy._core.multiarray"];
const NUMPY: &[&str] = &["numpy"];
const CODECS: &[&str] = &["_codecs"];

struct Stack {
    stack: Vec<Value>,
    /// Memo indices holding a copy of each stack slot, parallel to `stack`
    slot_memo: Vec<Vec<u32>>,
    marks: Vec<usize>,
    memo: HashMap<u32, Value>,
}

impl Stack {
    fn new() -> Self {
        Self {
            stack: Vec::new(),
            slot_memo: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    fn push(&mut self, v: Value) {
        self.push_tagged(v, Vec::new())
    }

    fn push_tagged(&mut self, v: Value, memo_ids: Vec<u32>) {
        self.stack.push(v);
        self.slot_memo.push(memo_ids);
    }

    fn pop(&mut self) -> Result<Value> {
        self.pop_tagged().map(|(v, _)| v)
    }

    fn pop_tagged(&mut self) -> Result<(Value, Vec<u32>)> {
        let v = self.stack.pop().ok_or(PickleError::StackUnderflow)?;
        let ids = self.slot_memo.pop().unwrap_or_default();
        Ok((v, ids))
    }

    fn top(&self) -> Result<&Value> {
        self.stack.last().ok_or(PickleError::StackUnderflow)
    }

    fn last_mut(&mut self) -> Result<&mut Value> {
        self.stack.last_mut().ok_or(PickleError::StackUnderflow)
    }

    fn push_mark(&mut self) {
        self.marks.push(self.stack.len());
    }

    fn pop_to_mark(&mut self) -> Result<Vec<Value>> {
        let pos = self.marks.pop().ok_or(PickleError::MarkNotFound)?;
        if pos > self.stack.len() {
            return Err(PickleError::StackUnderflow);
        }
        self.slot_memo.truncate(pos);
        Ok(self.stack.split_off(pos))
    }

    fn memo_put(&mut self, idx: u32) -> Result<()> {
        let top = self.top()?.clone();
        self.memo.insert(idx, top);
        if let Some(ids) = self.slot_memo.last_mut() {
            ids.push(idx);
        }
        Ok(())
    }

    /// Push the memoized value, remembering where it came from
    fn push_memo(&mut self, idx: u32) -> Result<()> {
        let v = self
            .memo
            .get(&idx)
            .cloned()
            .ok_or(PickleError::MemoNotFound(idx))?;
        self.push_tagged(v, vec![idx]);
        Ok(())
    }

    /// Copy the top of the stack back into its memo slots after an in-place
    /// change (APPEND, SETITEM, BUILD), so later GETs see the final object
    fn sync_top(&mut self) -> Result<()> {
        let (Some(top), Some(ids)) = (self.stack.last(), self.slot_memo.last()) else {
            return Err(PickleError::StackUnderflow);
        };
        for idx in ids {
            self.memo.insert(*idx, top.clone());
        }
        Ok(())
    }
}

fn read_line<R: BufRead>(r: &mut R) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(32);
    r.read_until(b'\n', &mut data)?;
    if data.pop() != Some(b'\n') {
        return Err(PickleError::Io(io::ErrorKind::UnexpectedEof.into()));
    }
    if data.last() == Some(&b'\r') {
        data.pop();
    }
    Ok(data)
}

fn read_utf8_line<R: BufRead>(r: &mut R) -> Result<String> {
    String::from_utf8(read_line(r)?)
        .map_err(|e| PickleError::InvalidData(format!("invalid UTF-8: {}", e)))
}

fn read_bytes<R: BufRead>(r: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    let read = Read::take(&mut *r, len as u64).read_to_end(&mut data)?;
    if read != len {
        return Err(PickleError::Io(io::ErrorKind::UnexpectedEof.into()));
    }
    Ok(data)
}

fn read_utf8<R: BufRead>(r: &mut R, len: usize) -> Result<String> {
    String::from_utf8(read_bytes(r, len)?)
        .map_err(|e| PickleError::InvalidData(format!("invalid UTF-8: {}", e)))
}

fn decode_long(data: &[u8]) -> Result<i64> {
    if data.len() > 8 {
        return Err(PickleError::InvalidData(format!(
            "integer of {} bytes does not fit in 64 bits",
            data.len()
        )));
    }
    let mut value = 0i64;
    for (i, &byte) in data.iter().enumerate() {
        value |= i64::from(byte) << (i * 8);
    }
    // sign-extend
    if let Some(&last) = data.last()
        && last & 0x80 != 0
        && data.len() < 8
    {
        value |= -1i64 << (data.len() * 8);
    }
    Ok(value)
}

fn to_usize(len: u64) -> Result<usize> {
    usize::try_from(len).map_err(|_| PickleError::InvalidData(format!("length {} too large", len)))
}

fn dict_key(key: Value) -> Result<String> {
    match key {
        Value::String(s) => Ok(s),
        Value::Bytes(b) => Ok(latin1(&b)),
        Value::Int(i) => Ok(i.to_string()),
        other => Err(PickleError::InvalidData(format!(
            "unsupported dict key {:?}",
            other
        ))),
    }
}

fn set_items(stack: &mut Stack, items: Vec<Value>, op: OpCode) -> Result<()> {
    if items.len() % 2 != 0 {
        return Err(PickleError::InvalidData(
            "odd number of items for dict".to_string(),
        ));
    }
    let Value::Dict(map) = stack.last_mut()? else {
        return Err(PickleError::UnexpectedOpCode(op));
    };
    let mut iter = items.into_iter();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        map.insert(dict_key(k)?, v);
    }
    stack.sync_top()
}

fn reduce(callable: Value, args: Value) -> Result<Value> {
    // Python 3 writes `bytes` under protocol 2 as `_codecs.encode(text, "latin1")`
    if callable.is_class(CODECS, "encode")
        && let Value::Tuple(items) = &args
        && let [Value::String(text), Value::String(encoding)] = items.as_slice()
    {
        let encoding = encoding.to_lowercase();
        if encoding != "latin1" && encoding != "latin-1" {
            return Err(PickleError::InvalidData(format!(
                "unsupported bytes encoding {}",
                encoding
            )));
        }
        return Ok(Value::Bytes(latin1_bytes(text)?));
    }
    Ok(Value::Reduce {
        callable: Box::new(callable),
        args: Box::new(args),
    })
}

/// Encode text whose characters all fit in one byte
fn latin1_bytes(text: &str) -> Result<Vec<u8>> {
    text.chars()
        .map(|c| {
            u8::try_from(u32::from(c))
                .map_err(|_| PickleError::InvalidData(format!("non latin-1 character {:?}", c)))
        })
        .collect()
}

fn item_size(dtype: &str) -> Option<usize> {
    dtype
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .ok()
}

fn build_ndarray(state: Value) -> Result<Value> {
    let Value::Tuple(items) = state else {
        return Err(PickleError::InvalidData(format!(
            "ndarray state must be a tuple, got {:?}",
            state
        )));
    };
    // (version, shape, dtype, is_fortran, rawdata); version is absent in very old pickles
    let fields: &[Value] = match items.len() {
        5 => &items[1..],
        4 => &items[..],
        n => {
            return Err(PickleError::InvalidData(format!(
                "ndarray state has {} fields",
                n
            )));
        }
    };
    let shape = fields[0]
        .as_seq()
        .ok_or_else(|| PickleError::InvalidData("ndarray shape must be a tuple".to_string()))?
        .iter()
        .map(|d| {
            d.as_int()
                .and_then(|d| usize::try_from(d).ok())
                .ok_or_else(|| PickleError::InvalidData(format!("invalid dimension {:?}", d)))
        })
        .collect::<Result<Vec<usize>>>()?;
    let Value::Dtype(dtype) = &fields[1] else {
        return Err(PickleError::InvalidData(format!(
            "ndarray dtype expected, got {:?}",
            fields[1]
        )));
    };
    let fortran_order = matches!(fields[2], Value::Bool(true) | Value::Int(1));
    let data = match &fields[3] {
        Value::Bytes(b) => b.clone(),
        Value::String(s) => latin1_bytes(s)?,
        _ => {
            return Err(PickleError::InvalidData(
                "ndarray raw data must be a byte string".to_string(),
            ));
        }
    };
    if let Some(size) = item_size(dtype) {
        let expected = shape
            .iter()
            .try_fold(size, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| {
                PickleError::InvalidData(format!("ndarray {:?} of {} is too large", shape, dtype))
            })?;
        if data.len() != expected {
            return Err(PickleError::InvalidData(format!(
                "ndarray {:?} of {} needs {} bytes, found {}",
                shape,
                dtype,
                expected,
                data.len()
            )));
        }
    }
    Ok(Value::NdArray(NdArray {
        shape,
        dtype: dtype.clone(),
        fortran_order,
        data,
    }))
}

fn build(object: Value, state: Value) -> Result<Value> {
    if let Value::Reduce { callable, args } = &object {
        if callable.is_class(NUMPY_MULTIARRAY, "_reconstruct") {
            return build_ndarray(state);
        }
        if callable.is_class(NUMPY, "dtype") {
            let code = args
                .as_seq()
                .and_then(|a| a.first())
                .and_then(Value::as_text)
                .ok_or_else(|| {
                    PickleError::InvalidData(format!("invalid dtype arguments {:?}", args))
                })?;
            return Ok(Value::Dtype(code));
        }
    }
    Ok(Value::Build {
        object: Box::new(object),
        state: Box::new(state),
    })
}

/// Decode one pickle from `r`, stopping at the STOP opcode
pub fn read_pickle<R: BufRead>(r: &mut R) -> Result<Value> {
    let mut stack = Stack::new();
    loop {
        let byte = r.read_u8()?;
        let op = OpCode::try_from(byte).map_err(PickleError::InvalidOpCode)?;
        match op {
            OpCode::Proto => {
                let version = r.read_u8()?;
                if version > 5 {
                    return Err(PickleError::InvalidProtocol(version));
                }
            }
            OpCode::Frame => {
                // frames only group opcodes for buffering
                let _ = r.read_u64::<LittleEndian>()?;
            }
            OpCode::Stop => return stack.pop(),
            OpCode::Mark => stack.push_mark(),
            OpCode::Global => {
                let module = read_utf8_line(r)?;
                let name = read_utf8_line(r)?;
                stack.push(Value::Class { module, name });
            }
            OpCode::StackGlobal => {
                let name = stack.pop()?.as_text();
                let module = stack.pop()?.as_text();
                match (module, name) {
                    (Some(module), Some(name)) => stack.push(Value::Class { module, name }),
                    _ => return Err(PickleError::UnexpectedOpCode(op)),
                }
            }
            OpCode::Put => {
                let line = read_utf8_line(r)?;
                let idx = line
                    .parse::<u32>()
                    .map_err(|e| PickleError::InvalidData(format!("bad PUT index: {}", e)))?;
                stack.memo_put(idx)?;
            }
            OpCode::BinPut => {
                let idx = r.read_u8()?;
                stack.memo_put(u32::from(idx))?;
            }
            OpCode::LongBinPut => {
                let idx = r.read_u32::<LittleEndian>()?;
                stack.memo_put(idx)?;
            }
            OpCode::Memoize => {
                let idx = u32::try_from(stack.memo.len())
                    .map_err(|_| PickleError::InvalidData("memo overflow".to_string()))?;
                stack.memo_put(idx)?;
            }
            OpCode::Get => {
                let line = read_utf8_line(r)?;
                let idx = line
                    .parse::<u32>()
                    .map_err(|e| PickleError::InvalidData(format!("bad GET index: {}", e)))?;
                stack.push_memo(idx)?;
            }
            OpCode::BinGet => stack.push_memo(u32::from(r.read_u8()?))?,
            OpCode::LongBinGet => stack.push_memo(r.read_u32::<LittleEndian>()?)?,
            OpCode::None => stack.push(Value::None),
            OpCode::NewTrue => stack.push(Value::Bool(true)),
            OpCode::NewFalse => stack.push(Value::Bool(false)),
            OpCode::Int => {
                let line = read_utf8_line(r)?;
                let v = match line.as_str() {
                    "00" => Value::Bool(false),
                    "01" => Value::Bool(true),
                    s => Value::Int(s.parse().map_err(|e| {
                        PickleError::InvalidData(format!("invalid INT value '{}': {}", s, e))
                    })?),
                };
                stack.push(v);
            }
            OpCode::BinInt => stack.push(Value::Int(i64::from(r.read_i32::<LittleEndian>()?))),
            OpCode::BinInt1 => stack.push(Value::Int(i64::from(r.read_u8()?))),
            OpCode::BinInt2 => stack.push(Value::Int(i64::from(r.read_u16::<LittleEndian>()?))),
            OpCode::Long1 => {
                let len = usize::from(r.read_u8()?);
                let data = read_bytes(r, len)?;
                stack.push(Value::Int(decode_long(&data)?));
            }
            OpCode::Long4 => {
                let len = to_usize(u64::from(r.read_u32::<LittleEndian>()?))?;
                let data = read_bytes(r, len)?;
                stack.push(Value::Int(decode_long(&data)?));
            }
            OpCode::BinFloat => stack.push(Value::Float(r.read_f64::<BigEndian>()?)),
            OpCode::ShortBinString | OpCode::ShortBinBytes => {
                let len = usize::from(r.read_u8()?);
                stack.push(Value::Bytes(read_bytes(r, len)?));
            }
            OpCode::BinString => {
                let len = r.read_i32::<LittleEndian>()?;
                let len = usize::try_from(len).map_err(|_| {
                    PickleError::InvalidData(format!("negative BINSTRING length {}", len))
                })?;
                stack.push(Value::Bytes(read_bytes(r, len)?));
            }
            OpCode::BinBytes => {
                let len = to_usize(u64::from(r.read_u32::<LittleEndian>()?))?;
                stack.push(Value::Bytes(read_bytes(r, len)?));
            }
            OpCode::BinBytes8 | OpCode::ByteArray8 => {
                let len = to_usize(r.read_u64::<LittleEndian>()?)?;
                stack.push(Value::Bytes(read_bytes(r, len)?));
            }
            OpCode::ShortBinUnicode => {
                let len = usize::from(r.read_u8()?);
                stack.push(Value::String(read_utf8(r, len)?));
            }
            OpCode::BinUnicode => {
                let len = to_usize(u64::from(r.read_u32::<LittleEndian>()?))?;
                stack.push(Value::String(read_utf8(r, len)?));
            }
            OpCode::BinUnicode8 => {
                let len = to_usize(r.read_u64::<LittleEndian>()?)?;
                stack.push(Value::String(read_utf8(r, len)?));
            }
            OpCode::EmptyTuple => stack.push(Value::Tuple(Vec::new())),
            OpCode::Tuple => {
                let items = stack.pop_to_mark()?;
                stack.push(Value::Tuple(items));
            }
            OpCode::Tuple1 => {
                let a = stack.pop()?;
                stack.push(Value::Tuple(vec![a]));
            }
            OpCode::Tuple2 => {
                let b = stack.pop()?;
                let a = stack.pop()?;
                stack.push(Value::Tuple(vec![a, b]));
            }
            OpCode::Tuple3 => {
                let c = stack.pop()?;
                let b = stack.pop()?;
                let a = stack.pop()?;
                stack.push(Value::Tuple(vec![a, b, c]));
            }
            OpCode::EmptyList => stack.push(Value::List(Vec::new())),
            OpCode::List => {
                let items = stack.pop_to_mark()?;
                stack.push(Value::List(items));
            }
            OpCode::Append => {
                let v = stack.pop()?;
                match stack.last_mut()? {
                    Value::List(list) => list.push(v),
                    _ => return Err(PickleError::UnexpectedOpCode(op)),
                }
                stack.sync_top()?;
            }
            OpCode::Appends => {
                let items = stack.pop_to_mark()?;
                match stack.last_mut()? {
                    Value::List(list) => list.extend(items),
                    _ => return Err(PickleError::UnexpectedOpCode(op)),
                }
                stack.sync_top()?;
            }
            OpCode::EmptyDict => stack.push(Value::Dict(HashMap::new())),
            OpCode::Dict => {
                let items = stack.pop_to_mark()?;
                stack.push(Value::Dict(HashMap::new()));
                set_items(&mut stack, items, op)?;
            }
            OpCode::SetItem => {
                let v = stack.pop()?;
                let k = stack.pop()?;
                set_items(&mut stack, vec![k, v], op)?;
            }
            OpCode::SetItems => {
                let items = stack.pop_to_mark()?;
                set_items(&mut stack, items, op)?;
            }
            OpCode::Reduce | OpCode::NewObj => {
                let args = stack.pop()?;
                let callable = stack.pop()?;
                stack.push(reduce(callable, args)?);
            }
            OpCode::Build => {
                let state = stack.pop()?;
                let (object, memo_ids) = stack.pop_tagged()?;
                stack.push_tagged(build(object, state)?, memo_ids);
                stack.sync_top()?;
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &[u8]) -> Result<Value> {
        read_pickle(&mut &bytes[..])
    }

    #[test]
    fn test_protocol2_dict_of_scalars() {
        // pickle.dumps({'a': 1, 'b': [2, 300]}, protocol=2) from Python 2
        let bytes = b"\x80\x02}q\x00(U\x01aq\x01K\x01U\x01bq\x02]q\x03(K\x02M,\x01eu.";
        let value = parse(bytes).unwrap();
        assert_eq!(value.get("a"), Some(&Value::Int(1)));
        let b = value.get("b").unwrap().as_seq().unwrap();
        assert_eq!(b, &[Value::Int(2), Value::Int(300)]);
    }

    #[test]
    fn test_memo_get_returns_stored_value() {
        // [u'x', <memo 0>]
        let bytes = b"\x80\x02](X\x01\x00\x00\x00xq\x00h\x00e.";
        let value = parse(bytes).unwrap();
        assert_eq!(
            value.as_seq().unwrap(),
            &[Value::String("x".to_string()), Value::String("x".to_string())]
        );
    }

    #[test]
    fn test_negative_and_long_ints() {
        // [-1 as BININT, 2**40 as LONG1]
        let bytes = b"\x80\x02](J\xff\xff\xff\xff\x8a\x06\x00\x00\x00\x00\x00\x01e.";
        let value = parse(bytes).unwrap();
        assert_eq!(
            value.as_seq().unwrap(),
            &[Value::Int(-1), Value::Int(1 << 40)]
        );
    }

    #[test]
    fn test_long1_negative() {
        assert_eq!(decode_long(&[0xff]).unwrap(), -1);
        assert_eq!(decode_long(&[0x00, 0x80]).unwrap(), -32768);
        assert_eq!(decode_long(&[]).unwrap(), 0);
    }

    #[test]
    fn test_numpy_uint8_array() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"\x80\x02cnumpy.core.multiarray\n_reconstruct\nq\x01");
        bytes.extend_from_slice(b"cnumpy\nndarray\nq\x02K\x00\x85U\x01b\x87Rq\x03");
        bytes.extend_from_slice(b"(K\x01K\x02K\x03\x86");
        bytes.extend_from_slice(b"cnumpy\ndtype\nq\x04U\x02u1K\x00K\x01\x87Rq\x05");
        bytes.extend_from_slice(b"(K\x03U\x01|NNNJ\xff\xff\xff\xffJ\xff\xff\xff\xffK\x00tb");
        bytes.extend_from_slice(b"\x89U\x06\x00\x01\x02\x03\x04\x05tb.");

        let value = parse(&bytes).unwrap();
        let Value::NdArray(array) = value else {
            panic!("expected ndarray, got {value:?}");
        };
        assert_eq!(array.shape, vec![2, 3]);
        assert_eq!(array.dtype, "u1");
        assert!(!array.fortran_order);
        assert_eq!(array.data, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_memoized_list_sees_later_appends() {
        // x = [1, 2]; [x, x]: the second reference is a GET of the filled list
        let bytes = b"\x80\x02](]q\x01(K\x01K\x02eh\x01e.";
        let value = parse(bytes).unwrap();
        let pair = vec![Value::Int(1), Value::Int(2)];
        assert_eq!(
            value.as_seq().unwrap(),
            &[Value::List(pair.clone()), Value::List(pair)]
        );
    }

    #[test]
    fn test_arrays_sharing_one_dtype() {
        // [a, b] where b reuses a's dtype object through the memo
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"\x80\x02]q\x00(");
        bytes.extend_from_slice(b"cnumpy.core.multiarray\n_reconstruct\nq\x01");
        bytes.extend_from_slice(b"cnumpy\nndarray\nq\x02K\x00\x85U\x01b\x87Rq\x03");
        bytes.extend_from_slice(b"(K\x01K\x02\x85");
        bytes.extend_from_slice(b"cnumpy\ndtype\nq\x04U\x02u1K\x00K\x01\x87Rq\x05");
        bytes.extend_from_slice(b"(K\x03U\x01|NNNJ\xff\xff\xff\xffJ\xff\xff\xff\xffK\x00tb");
        bytes.extend_from_slice(b"\x89U\x02\x00\x01tb");
        bytes.extend_from_slice(b"h\x01h\x02K\x00\x85U\x01b\x87Rq\x06");
        bytes.extend_from_slice(b"(K\x01K\x03\x85h\x05\x89U\x03\x07\x08\x09tb");
        bytes.extend_from_slice(b"e.");

        let value = parse(&bytes).unwrap();
        let arrays = value.as_seq().unwrap();
        assert_eq!(arrays.len(), 2);
        let Value::NdArray(second) = &arrays[1] else {
            panic!("expected ndarray, got {:?}", arrays[1]);
        };
        assert_eq!(second.dtype, "u1");
        assert_eq!(second.shape, vec![3]);
        assert_eq!(second.data, vec![7, 8, 9]);
        assert!(matches!(&arrays[0], Value::NdArray(a) if a.data == vec![0, 1]));
    }

    #[test]
    fn test_numpy_array_with_overflowing_shape() {
        // shape (2**62, 2**62) with an empty buffer
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"\x80\x02cnumpy.core.multiarray\n_reconstruct\n");
        bytes.extend_from_slice(b"cnumpy\nndarray\nK\x00\x85U\x01b\x87R");
        bytes.extend_from_slice(b"(K\x01");
        bytes.extend_from_slice(b"\x8a\x08\x00\x00\x00\x00\x00\x00\x00\x40");
        bytes.extend_from_slice(b"\x8a\x08\x00\x00\x00\x00\x00\x00\x00\x40\x86");
        bytes.extend_from_slice(b"cnumpy\ndtype\nU\x02u1K\x00K\x01\x87R");
        bytes.extend_from_slice(b"(K\x03U\x01|NNNJ\xff\xff\xff\xffJ\xff\xff\xff\xffK\x00tb");
        bytes.extend_from_slice(b"\x89U\x00tb.");

        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err, PickleError::InvalidData(_)), "{err}");
    }

    #[test]
    fn test_numpy_text_buffer_must_be_latin1() {
        // raw data given as unicode text containing U+0100
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"\x80\x02cnumpy.core.multiarray\n_reconstruct\n");
        bytes.extend_from_slice(b"cnumpy\nndarray\nK\x00\x85U\x01b\x87R");
        bytes.extend_from_slice(b"(K\x01K\x01\x85");
        bytes.extend_from_slice(b"cnumpy\ndtype\nU\x02u1K\x00K\x01\x87R");
        bytes.extend_from_slice(b"(K\x03U\x01|NNNJ\xff\xff\xff\xffJ\xff\xff\xff\xffK\x00tb");
        bytes.extend_from_slice(b"\x89X\x02\x00\x00\x00\xc4\x80tb.");

        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err, PickleError::InvalidData(_)), "{err}");
    }

    #[test]
    fn test_numpy_array_with_wrong_byte_count() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"\x80\x02cnumpy.core.multiarray\n_reconstruct\n");
        bytes.extend_from_slice(b"cnumpy\nndarray\nK\x00\x85U\x01b\x87R");
        bytes.extend_from_slice(b"(K\x01K\x04\x85");
        bytes.extend_from_slice(b"cnumpy\ndtype\nU\x02u1K\x00K\x01\x87R");
        bytes.extend_from_slice(b"(K\x03U\x01|NNNJ\xff\xff\xff\xffJ\xff\xff\xff\xffK\x00tb");
        bytes.extend_from_slice(b"\x89U\x02\x00\x01tb.");

        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err, PickleError::InvalidData(_)), "{err}");
    }

    #[test]
    fn test_codecs_encode_becomes_bytes() {
        // _codecs.encode(u'\xff\x00', 'latin1')
        let bytes = b"\x80\x02c_codecs\nencode\nX\x03\x00\x00\x00\xc3\xbf\x00X\x06\x00\x00\x00latin1\x86R.";
        assert_eq!(parse(bytes).unwrap(), Value::Bytes(vec![0xff, 0x00]));
    }

    #[test]
    fn test_unknown_reduce_is_kept_opaque() {
        let bytes = b"\x80\x02cos\nsystem\nX\x02\x00\x00\x00ls\x85R.";
        let value = parse(bytes).unwrap();
        assert!(matches!(value, Value::Reduce { .. }));
    }

    #[test]
    fn test_truncated_stream() {
        let err = parse(b"\x80\x02}q\x00(U\x04da").unwrap_err();
        assert!(matches!(err, PickleError::Io(_)));
    }

    #[test]
    fn test_invalid_opcode() {
        let err = parse(b"\x80\x02\xff").unwrap_err();
        assert!(matches!(err, PickleError::InvalidOpCode(0xff)));
    }

    #[test]
    fn test_unsupported_protocol() {
        let err = parse(b"\x80\x06.").unwrap_err();
        assert!(matches!(err, PickleError::InvalidProtocol(6)));
    }

    #[test]
    fn test_tuple_without_mark() {
        let err = parse(b"\x80\x02K\x01t.").unwrap_err();
        assert!(matches!(err, PickleError::MarkNotFound));
    }

    #[test]
    fn test_stop_on_empty_stack() {
        let err = parse(b"\x80\x02.").unwrap_err();
        assert!(matches!(err, PickleError::StackUnderflow));
    }
}
