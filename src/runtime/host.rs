// src/runtime/host.rs
//! Host-provided operations
//!
//! Every external call that is not a runtime-library builtin and not denied
//! by policy is routed to the simulation engine through [`HostApi`]. The
//! sandbox has already charged the call's cost when `invoke` runs.

use crate::program::ir::OpRef;
use crate::runtime::actor::ActorInfo;
use crate::runtime::value::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Failure reported by the host for one call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HostError {
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The simulation engine's robot-controller surface
pub trait HostApi {
    /// Perform `op` for `actor`. Returned values must not be heap references.
    fn invoke(&mut self, actor: &ActorInfo, op: &OpRef, args: &[Value]) -> Result<Value, HostError>;
}

/// Host that answers every call with unit
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl HostApi for NullHost {
    fn invoke(&mut self, _actor: &ActorInfo, _op: &OpRef, _args: &[Value]) -> Result<Value, HostError> {
        Ok(Value::Unit)
    }
}

/// One call seen by a [`ScriptedHost`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCall {
    pub actor_id: u32,
    pub round: u32,
    pub op: OpRef,
    pub args: Vec<Value>,
}

/// Host with canned answers that records every call it receives
#[derive(Debug, Default)]
pub struct ScriptedHost {
    responses: HashMap<OpRef, Result<Value, HostError>>,
    calls: Vec<HostCall>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `op` with `value`
    pub fn respond(mut self, op: &str, value: Value) -> Self {
        self.responses.insert(parse(op), Ok(value));
        self
    }

    /// Fail every call to `op`
    pub fn fail(mut self, op: &str, message: &str) -> Self {
        self.responses.insert(parse(op), Err(HostError::new(message)));
        self
    }

    pub fn calls(&self) -> &[HostCall] {
        &self.calls
    }

    /// Names of the operations called, in order
    pub fn call_names(&self) -> Vec<String> {
        self.calls.iter().map(|c| c.op.to_string()).collect()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

fn parse(op: &str) -> OpRef {
    OpRef::parse(op).unwrap_or_else(|| OpRef::new("", op))
}

impl HostApi for ScriptedHost {
    fn invoke(&mut self, actor: &ActorInfo, op: &OpRef, args: &[Value]) -> Result<Value, HostError> {
        self.calls.push(HostCall {
            actor_id: actor.id,
            round: actor.round,
            op: op.clone(),
            args: args.to_vec(),
        });
        self.responses.get(op).cloned().unwrap_or(Ok(Value::Unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::team::{RobotType, Team};

    fn info() -> ActorInfo {
        ActorInfo {
            team: Team::A,
            role: RobotType::Politician,
            id: 4,
            round: 2,
        }
    }

    #[test]
    fn test_scripted_answers_and_records() {
        let mut host = ScriptedHost::new()
            .respond("RobotController.getRoundNum", Value::Int(2))
            .fail("RobotController.move", "blocked");

        let round = host
            .invoke(&info(), &OpRef::new("RobotController", "getRoundNum"), &[])
            .unwrap();
        assert_eq!(round, Value::Int(2));

        let err = host
            .invoke(&info(), &OpRef::new("RobotController", "move"), &[Value::Int(1)])
            .unwrap_err();
        assert_eq!(err.message, "blocked");

        let other = host
            .invoke(&info(), &OpRef::new("RobotController", "canMove"), &[])
            .unwrap();
        assert!(other.is_unit());

        assert_eq!(
            host.call_names(),
            vec![
                "RobotController.getRoundNum",
                "RobotController.move",
                "RobotController.canMove"
            ]
        );
        assert_eq!(host.calls()[1].args, vec![Value::Int(1)]);
        assert_eq!(host.calls()[0].actor_id, 4);
    }
}
