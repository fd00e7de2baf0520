use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{
    error::{RSKVError, RSKVResult},
    storage::mvcc::{Key, Mvcc, MvccTransaction, TxId, Value},
};

// 客户端命令定义，也是 client/server 之间的传输格式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Begin,
    Commit,
    Abort,
    Set {
        #[serde(with = "serde_bytes")]
        key: Key,
        #[serde(with = "serde_bytes")]
        value: Value,
    },
    Delete {
        #[serde(with = "serde_bytes")]
        key: Key,
    },
    Get {
        #[serde(with = "serde_bytes")]
        key: Key,
    },
}

impl Command {
    // 解析一行命令文本，引擎本身只接受结构化的 Command
    pub fn parse(input: &str) -> RSKVResult<Self> {
        let tokens = input.split_whitespace().collect::<Vec<_>>();
        match tokens.as_slice() {
            ["begin"] => Ok(Command::Begin),
            ["commit"] => Ok(Command::Commit),
            ["abort"] => Ok(Command::Abort),
            ["set", key, value] => Ok(Command::Set {
                key: key.as_bytes().to_vec(),
                value: value.as_bytes().to_vec(),
            }),
            ["delete", key] => Ok(Command::Delete {
                key: key.as_bytes().to_vec(),
            }),
            ["get", key] => Ok(Command::Get {
                key: key.as_bytes().to_vec(),
            }),
            _ => Err(RSKVError::Parse(format!(
                "unrecognized command: {}",
                input
            ))),
        }
    }
}

// 命令执行结果
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub enum ResultSet {
    Begin { id: TxId },
    Commit { id: TxId },
    Abort { id: TxId },
    Set,
    Delete,
    Get {
        #[serde(with = "serde_bytes")]
        value: Value,
    },
}

impl Display for ResultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultSet::Begin { id } => write!(f, "BEGIN {}", id),
            ResultSet::Commit { id } => write!(f, "COMMIT {}", id),
            ResultSet::Abort { id } => write!(f, "ABORT {}", id),
            ResultSet::Set => write!(f, "OK"),
            ResultSet::Delete => write!(f, "OK"),
            ResultSet::Get { value } => write!(f, "{}", String::from_utf8_lossy(value)),
        }
    }
}

// 客户端 session 定义，一个连接最多持有一个活跃事务
pub struct Session {
    engine: Mvcc,
    txn: Option<MvccTransaction>,
}

impl Session {
    pub fn new(engine: Mvcc) -> Self {
        Self { engine, txn: None }
    }

    // 执行客户端命令
    pub fn execute(&mut self, command: Command) -> RSKVResult<ResultSet> {
        match command {
            Command::Begin => {
                if self.txn.is_some() {
                    return Err(RSKVError::Internal(
                        "transaction already in progress".into(),
                    ));
                }
                let txn = self.engine.begin()?;
                let id = txn.id();
                self.txn = Some(txn);
                Ok(ResultSet::Begin { id })
            }
            Command::Commit => {
                let txn = self
                    .txn
                    .take()
                    .ok_or(RSKVError::Internal("no transaction in progress".into()))?;
                let id = txn.id();
                // 提交冲突时事务同样从连接上清除，错误原样上抛
                txn.commit()?;
                Ok(ResultSet::Commit { id })
            }
            Command::Abort => {
                let txn = self
                    .txn
                    .take()
                    .ok_or(RSKVError::Internal("no transaction in progress".into()))?;
                let id = txn.id();
                txn.rollback()?;
                Ok(ResultSet::Abort { id })
            }
            Command::Set { key, value } => {
                self.active_txn()?.set(key, value)?;
                Ok(ResultSet::Set)
            }
            Command::Delete { key } => {
                self.active_txn()?.delete(key)?;
                Ok(ResultSet::Delete)
            }
            Command::Get { key } => {
                let value = self.active_txn()?.get(key)?;
                Ok(ResultSet::Get { value })
            }
        }
    }

    fn active_txn(&self) -> RSKVResult<&MvccTransaction> {
        self.txn
            .as_ref()
            .ok_or(RSKVError::Internal("no transaction in progress".into()))
    }
}
