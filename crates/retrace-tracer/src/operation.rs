//! The recorded operation model.
//!
//! Every state-database call worth replaying becomes one `Operation`
//! variant with a single-byte tag and a little-endian payload of
//! dictionary indices. BeginBlock/EndBlock exist only to frame the stream
//! in memory: the writer turns them into index entries and they never
//! reach the wire.

use crate::dictionary::DictionaryError;
use crate::dictionary_context::DictionaryContext;
use retrace_state::StateDb;
use std::io::{self, Read, Write};
use tracing::debug;

const TAG_GET_STATE: u8 = 0;
const TAG_SET_STATE: u8 = 1;
const TAG_GET_COMMITTED_STATE: u8 = 2;
const TAG_SNAPSHOT: u8 = 3;
const TAG_REVERT_TO_SNAPSHOT: u8 = 4;
const TAG_CREATE_ACCOUNT: u8 = 5;
const TAG_GET_BALANCE: u8 = 6;
const TAG_GET_CODE_HASH: u8 = 7;
const TAG_SUICIDE: u8 = 8;
const TAG_EXIST: u8 = 9;
const TAG_FINALISE: u8 = 10;
const TAG_END_TRANSACTION: u8 = 11;
const TAG_BEGIN_BLOCK: u8 = 12;
const TAG_END_BLOCK: u8 = 13;

/// Errors while reading or writing trace records.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// A tag byte outside the recognized set.
    #[error("invalid operation tag 0x{0:02X}")]
    InvalidTag(u8),

    /// A pseudo-operation tag found on the wire.
    #[error("pseudo operation tag 0x{0:02X} on the wire")]
    PseudoTag(u8),

    /// The stream ended inside an operation payload.
    #[error("truncated {0} payload")]
    Truncated(&'static str),

    /// A boolean byte that is neither 0 nor 1.
    #[error("invalid boolean byte 0x{0:02X}")]
    InvalidBool(u8),

    #[error("trace i/o: {0}")]
    Io(#[from] io::Error),
}

/// One recorded state-database interaction, or a framing pseudo-operation.
///
/// `contract`, `key` and `value` fields are dictionary indices, not raw
/// domain values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    GetState { contract: u32, key: u32 },
    SetState { contract: u32, key: u32, value: u64 },
    GetCommittedState { contract: u32, key: u32 },
    Snapshot,
    RevertToSnapshot { snapshot: i32 },
    CreateAccount { contract: u32 },
    GetBalance { contract: u32 },
    GetCodeHash { contract: u32 },
    Suicide { contract: u32 },
    Exist { contract: u32 },
    Finalise { delete_empty_objects: bool },
    EndTransaction,
    /// Opens block `block`. Never serialized; drives the indexes.
    BeginBlock { block: u64 },
    /// Closes block `block`. Never serialized.
    EndBlock { block: u64 },
}

impl Operation {
    /// The on-disk tag byte (pseudo-operations report theirs even though
    /// they never reach the disk).
    pub fn tag(&self) -> u8 {
        match self {
            Self::GetState { .. } => TAG_GET_STATE,
            Self::SetState { .. } => TAG_SET_STATE,
            Self::GetCommittedState { .. } => TAG_GET_COMMITTED_STATE,
            Self::Snapshot => TAG_SNAPSHOT,
            Self::RevertToSnapshot { .. } => TAG_REVERT_TO_SNAPSHOT,
            Self::CreateAccount { .. } => TAG_CREATE_ACCOUNT,
            Self::GetBalance { .. } => TAG_GET_BALANCE,
            Self::GetCodeHash { .. } => TAG_GET_CODE_HASH,
            Self::Suicide { .. } => TAG_SUICIDE,
            Self::Exist { .. } => TAG_EXIST,
            Self::Finalise { .. } => TAG_FINALISE,
            Self::EndTransaction => TAG_END_TRANSACTION,
            Self::BeginBlock { .. } => TAG_BEGIN_BLOCK,
            Self::EndBlock { .. } => TAG_END_BLOCK,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::GetState { .. } => "GetState",
            Self::SetState { .. } => "SetState",
            Self::GetCommittedState { .. } => "GetCommittedState",
            Self::Snapshot => "Snapshot",
            Self::RevertToSnapshot { .. } => "RevertToSnapshot",
            Self::CreateAccount { .. } => "CreateAccount",
            Self::GetBalance { .. } => "GetBalance",
            Self::GetCodeHash { .. } => "GetCodeHash",
            Self::Suicide { .. } => "Suicide",
            Self::Exist { .. } => "Exist",
            Self::Finalise { .. } => "Finalise",
            Self::EndTransaction => "EndTransaction",
            Self::BeginBlock { .. } => "BeginBlock",
            Self::EndBlock { .. } => "EndBlock",
        }
    }

    /// Whether this operation frames the stream instead of being part of
    /// it.
    pub fn is_pseudo(&self) -> bool {
        matches!(self, Self::BeginBlock { .. } | Self::EndBlock { .. })
    }

    /// Size in bytes of the serialized form, tag included.
    ///
    /// Panics for pseudo-operations, which have no serialized form.
    pub fn encoded_len(&self) -> u64 {
        match self {
            Self::GetState { .. } | Self::GetCommittedState { .. } => 9,
            Self::SetState { .. } => 17,
            Self::Snapshot | Self::EndTransaction => 1,
            Self::RevertToSnapshot { .. }
            | Self::CreateAccount { .. }
            | Self::GetBalance { .. }
            | Self::GetCodeHash { .. }
            | Self::Suicide { .. }
            | Self::Exist { .. } => 5,
            Self::Finalise { .. } => 2,
            Self::BeginBlock { .. } | Self::EndBlock { .. } => {
                panic!("pseudo operation {} has no serialized form", self.name())
            }
        }
    }

    /// Serializes the operation as tag byte plus little-endian payload.
    ///
    /// Panics when called on a pseudo-operation; those must be filtered by
    /// the writer.
    pub fn write(&self, out: &mut impl Write) -> Result<(), TraceError> {
        if let Self::BeginBlock { block } | Self::EndBlock { block } = self {
            panic!(
                "pseudo operation {} for block {block} cannot be serialized",
                self.name()
            );
        }
        out.write_all(&[self.tag()])?;
        match self {
            Self::GetState { contract, key } | Self::GetCommittedState { contract, key } => {
                out.write_all(&contract.to_le_bytes())?;
                out.write_all(&key.to_le_bytes())?;
            }
            Self::SetState { contract, key, value } => {
                out.write_all(&contract.to_le_bytes())?;
                out.write_all(&key.to_le_bytes())?;
                out.write_all(&value.to_le_bytes())?;
            }
            Self::Snapshot | Self::EndTransaction => {}
            Self::RevertToSnapshot { snapshot } => {
                out.write_all(&snapshot.to_le_bytes())?;
            }
            Self::CreateAccount { contract }
            | Self::GetBalance { contract }
            | Self::GetCodeHash { contract }
            | Self::Suicide { contract }
            | Self::Exist { contract } => {
                out.write_all(&contract.to_le_bytes())?;
            }
            Self::Finalise { delete_empty_objects } => {
                out.write_all(&[*delete_empty_objects as u8])?;
            }
            Self::BeginBlock { .. } | Self::EndBlock { .. } => unreachable!(),
        }
        Ok(())
    }

    /// Reads one operation. `Ok(None)` is the clean end of the stream,
    /// reached exactly at a tag boundary; anything else that cuts a record
    /// short is an error.
    pub fn read(input: &mut impl Read) -> Result<Option<Operation>, TraceError> {
        let mut tag = [0u8; 1];
        if let Err(err) = input.read_exact(&mut tag) {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                return Ok(None);
            }
            return Err(err.into());
        }

        let op = match tag[0] {
            TAG_GET_STATE => Operation::GetState {
                contract: read_u32(input, "GetState")?,
                key: read_u32(input, "GetState")?,
            },
            TAG_SET_STATE => Operation::SetState {
                contract: read_u32(input, "SetState")?,
                key: read_u32(input, "SetState")?,
                value: read_u64(input, "SetState")?,
            },
            TAG_GET_COMMITTED_STATE => Operation::GetCommittedState {
                contract: read_u32(input, "GetCommittedState")?,
                key: read_u32(input, "GetCommittedState")?,
            },
            TAG_SNAPSHOT => Operation::Snapshot,
            TAG_REVERT_TO_SNAPSHOT => Operation::RevertToSnapshot {
                snapshot: read_i32(input, "RevertToSnapshot")?,
            },
            TAG_CREATE_ACCOUNT => Operation::CreateAccount {
                contract: read_u32(input, "CreateAccount")?,
            },
            TAG_GET_BALANCE => Operation::GetBalance {
                contract: read_u32(input, "GetBalance")?,
            },
            TAG_GET_CODE_HASH => Operation::GetCodeHash {
                contract: read_u32(input, "GetCodeHash")?,
            },
            TAG_SUICIDE => Operation::Suicide {
                contract: read_u32(input, "Suicide")?,
            },
            TAG_EXIST => Operation::Exist {
                contract: read_u32(input, "Exist")?,
            },
            TAG_FINALISE => Operation::Finalise {
                delete_empty_objects: read_bool(input, "Finalise")?,
            },
            TAG_END_TRANSACTION => Operation::EndTransaction,
            TAG_BEGIN_BLOCK | TAG_END_BLOCK => return Err(TraceError::PseudoTag(tag[0])),
            other => return Err(TraceError::InvalidTag(other)),
        };
        Ok(Some(op))
    }

    /// Applies the operation to `db`, resolving indices through `dicts`.
    ///
    /// Read results are discarded; replay only needs the state mutations
    /// and the DB-internal effects of the reads. Panics when called on a
    /// pseudo-operation.
    pub fn execute(
        &self,
        db: &mut dyn StateDb,
        dicts: &DictionaryContext,
    ) -> Result<(), DictionaryError> {
        match self {
            Self::GetState { contract, key } => {
                let address = dicts.contract(*contract)?;
                let key = dicts.storage(*key)?;
                db.get_state(address, key);
            }
            Self::SetState { contract, key, value } => {
                let address = dicts.contract(*contract)?;
                let key = dicts.storage(*key)?;
                let value = dicts.value(*value)?;
                db.set_state(address, key, value);
            }
            Self::GetCommittedState { contract, key } => {
                let address = dicts.contract(*contract)?;
                let key = dicts.storage(*key)?;
                db.get_committed_state(address, key);
            }
            Self::Snapshot => {
                db.snapshot();
            }
            Self::RevertToSnapshot { snapshot } => {
                db.revert_to_snapshot(*snapshot);
            }
            Self::CreateAccount { contract } => {
                db.create_account(dicts.contract(*contract)?);
            }
            Self::GetBalance { contract } => {
                db.get_balance(dicts.contract(*contract)?);
            }
            Self::GetCodeHash { contract } => {
                db.get_code_hash(dicts.contract(*contract)?);
            }
            Self::Suicide { contract } => {
                db.suicide(dicts.contract(*contract)?);
            }
            Self::Exist { contract } => {
                db.exist(dicts.contract(*contract)?);
            }
            Self::Finalise { delete_empty_objects } => {
                db.finalise(*delete_empty_objects);
            }
            Self::EndTransaction => {}
            Self::BeginBlock { block } | Self::EndBlock { block } => {
                panic!(
                    "pseudo operation {} for block {block} cannot be executed",
                    self.name()
                );
            }
        }
        Ok(())
    }

    /// Emits a debug line for the operation, resolving indices where the
    /// dictionaries allow it. `sequence` is the operation's ordinal in the
    /// trace.
    pub fn debug(&self, dicts: &DictionaryContext, sequence: u64) {
        let contract = |index: u32| {
            dicts
                .contract(index)
                .map(|a| a.to_string())
                .unwrap_or_else(|_| format!("#{index}"))
        };
        let storage = |index: u32| {
            dicts
                .storage(index)
                .map(|k| k.to_string())
                .unwrap_or_else(|_| format!("#{index}"))
        };

        match self {
            Self::GetState { contract: c, key } => {
                debug!(target: "retrace::replay", sequence, contract = %contract(*c), key = %storage(*key), "GetState");
            }
            Self::SetState { contract: c, key, value } => {
                let value = dicts
                    .value(*value)
                    .map(|v| v.to_string())
                    .unwrap_or_else(|_| format!("#{value}"));
                debug!(target: "retrace::replay", sequence, contract = %contract(*c), key = %storage(*key), value = %value, "SetState");
            }
            Self::GetCommittedState { contract: c, key } => {
                debug!(target: "retrace::replay", sequence, contract = %contract(*c), key = %storage(*key), "GetCommittedState");
            }
            Self::Snapshot => debug!(target: "retrace::replay", sequence, "Snapshot"),
            Self::RevertToSnapshot { snapshot } => {
                debug!(target: "retrace::replay", sequence, snapshot, "RevertToSnapshot");
            }
            Self::CreateAccount { contract: c } => {
                debug!(target: "retrace::replay", sequence, contract = %contract(*c), "CreateAccount");
            }
            Self::GetBalance { contract: c } => {
                debug!(target: "retrace::replay", sequence, contract = %contract(*c), "GetBalance");
            }
            Self::GetCodeHash { contract: c } => {
                debug!(target: "retrace::replay", sequence, contract = %contract(*c), "GetCodeHash");
            }
            Self::Suicide { contract: c } => {
                debug!(target: "retrace::replay", sequence, contract = %contract(*c), "Suicide");
            }
            Self::Exist { contract: c } => {
                debug!(target: "retrace::replay", sequence, contract = %contract(*c), "Exist");
            }
            Self::Finalise { delete_empty_objects } => {
                debug!(target: "retrace::replay", sequence, delete_empty_objects, "Finalise");
            }
            Self::EndTransaction => debug!(target: "retrace::replay", sequence, "EndTransaction"),
            Self::BeginBlock { block } => {
                debug!(target: "retrace::replay", sequence, block, "BeginBlock");
            }
            Self::EndBlock { block } => {
                debug!(target: "retrace::replay", sequence, block, "EndBlock");
            }
        }
    }
}

fn truncated_or_io(err: io::Error, op: &'static str) -> TraceError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        TraceError::Truncated(op)
    } else {
        TraceError::Io(err)
    }
}

fn read_u32(input: &mut impl Read, op: &'static str) -> Result<u32, TraceError> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf).map_err(|e| truncated_or_io(e, op))?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(input: &mut impl Read, op: &'static str) -> Result<u64, TraceError> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf).map_err(|e| truncated_or_io(e, op))?;
    Ok(u64::from_le_bytes(buf))
}

fn read_i32(input: &mut impl Read, op: &'static str) -> Result<i32, TraceError> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf).map_err(|e| truncated_or_io(e, op))?;
    Ok(i32::from_le_bytes(buf))
}

fn read_bool(input: &mut impl Read, op: &'static str) -> Result<bool, TraceError> {
    let mut buf = [0u8; 1];
    input.read_exact(&mut buf).map_err(|e| truncated_or_io(e, op))?;
    match buf[0] {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(TraceError::InvalidBool(other)),
    }
}
