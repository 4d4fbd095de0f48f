//! Programmable transaction model.
//!
//! A small, serializable description of a ledger transaction: a list of
//! commands whose arguments are objects, pure values, or results of earlier
//! commands. The purchaser builds one to buy a capability, and the approval
//! call constructor appends to one that is only ever simulated.

use serde::{Deserialize, Serialize};

use super::ids::ObjectId;

/// An input to a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Argument {
    /// An on-ledger object passed by id.
    Object(ObjectId),
    Pure(PureValue),
    /// The single result of command `n`.
    Result(u16),
    /// Result `i` of command `n`.
    NestedResult(u16, u16),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PureValue {
    U64(u64),
    Bytes(#[serde(with = "hex_bytes")] Vec<u8>),
}

/// `package::module::function<type_arguments>(arguments)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveCall {
    pub package: ObjectId,
    pub module: String,
    pub function: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub type_arguments: Vec<String>,
    pub arguments: Vec<Argument>,
}

impl MoveCall {
    pub fn target(&self) -> String {
        format!("{}::{}::{}", self.package, self.module, self.function)
    }

    pub fn is(&self, module: &str, function: &str) -> bool {
        self.module == module && self.function == function
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    MoveCall(MoveCall),
    MergeCoins {
        destination: Argument,
        sources: Vec<Argument>,
    },
    SplitCoins {
        coin: Argument,
        amounts: Vec<Argument>,
    },
}

/// Mutable builder; commands are appended in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionBuilder {
    commands: Vec<Command>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gas_budget: Option<u64>,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, id: ObjectId) -> Argument {
        Argument::Object(id)
    }

    pub fn pure_u64(&self, value: u64) -> Argument {
        Argument::Pure(PureValue::U64(value))
    }

    pub fn pure_bytes(&self, value: impl Into<Vec<u8>>) -> Argument {
        Argument::Pure(PureValue::Bytes(value.into()))
    }

    fn push(&mut self, command: Command) -> u16 {
        self.commands.push(command);
        // u16::MAX commands is far beyond any transaction the ledger accepts.
        u16::try_from(self.commands.len() - 1).unwrap_or(u16::MAX)
    }

    /// Appends a move call and returns a reference to its result.
    pub fn move_call(
        &mut self,
        package: ObjectId,
        module: &str,
        function: &str,
        type_arguments: Vec<String>,
        arguments: Vec<Argument>,
    ) -> Argument {
        let index = self.push(Command::MoveCall(MoveCall {
            package,
            module: module.to_string(),
            function: function.to_string(),
            type_arguments,
            arguments,
        }));
        Argument::Result(index)
    }

    pub fn merge_coins(&mut self, destination: Argument, sources: Vec<Argument>) {
        self.push(Command::MergeCoins {
            destination,
            sources,
        });
    }

    /// Splits one coin per amount off `coin`; returns the first new coin.
    pub fn split_coins(&mut self, coin: Argument, amounts: Vec<Argument>) -> Argument {
        let index = self.push(Command::SplitCoins { coin, amounts });
        Argument::NestedResult(index, 0)
    }

    pub fn set_gas_budget(&mut self, budget: u64) {
        self.gas_budget = Some(budget);
    }

    pub fn gas_budget(&self) -> Option<u64> {
        self.gas_budget
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn move_calls(&self) -> impl Iterator<Item = &MoveCall> {
        self.commands.iter().filter_map(|c| match c {
            Command::MoveCall(call) => Some(call),
            _ => None,
        })
    }

    /// Transaction-kind bytes (commands only, no gas data), as sent to key servers.
    pub fn kind_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.commands)
    }

    pub fn from_kind_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let commands: Vec<Command> = serde_json::from_slice(bytes)?;
        Ok(Self {
            commands,
            gas_budget: None,
        })
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
