use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};

use crate::error::{RSKVError, RSKVResult};

pub type TxId = u64;
pub type Key = Vec<u8>;
pub type Value = Vec<u8>;

// 隔离级别，数据库级别的默认值，begin 时固定到事务上
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Snapshot,
    Serializable,
}

impl FromStr for IsolationLevel {
    type Err = RSKVError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read-uncommitted" => Ok(IsolationLevel::ReadUncommitted),
            "read-committed" => Ok(IsolationLevel::ReadCommitted),
            "repeatable-read" => Ok(IsolationLevel::RepeatableRead),
            "snapshot" => Ok(IsolationLevel::Snapshot),
            "serializable" => Ok(IsolationLevel::Serializable),
            _ => Err(RSKVError::Parse(format!("unknown isolation level: {}", s))),
        }
    }
}

// 事务状态，Committed 和 Aborted 为终态
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransactionState {
    InProgress,
    Committed,
    Aborted,
}

// 版本记录，tx_end_id 为 0 表示未被删除
#[derive(Debug)]
struct Version {
    tx_start_id: TxId,
    tx_end_id: TxId,
    value: Value,
}

// 事务记录，inprogress 是 begin 时刻的活跃事务快照，之后不再变化
#[derive(Debug, Clone)]
struct Transaction {
    id: TxId,
    isolation_level: IsolationLevel,
    state: TransactionState,
    inprogress: HashSet<TxId>,
    writeset: HashSet<Key>,
    readset: HashSet<Key>,
}

pub struct MvccInner {
    default_isolation: IsolationLevel,
    // 事务 ID 从 1 开始分配，0 保留作 tx_end_id 的未删除标记
    next_tx_id: TxId,
    // 事务表只增不减，可见性判断需要查询任意历史事务的状态
    transactions: HashMap<TxId, Transaction>,
    // 每个 key 对应一条按写入顺序追加的版本链
    store: HashMap<Key, Vec<Version>>,
}

#[derive(Clone)]
pub struct Mvcc {
    inner: Arc<Mutex<MvccInner>>,
}

impl Mvcc {
    pub fn new(default_isolation: IsolationLevel) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MvccInner {
                default_isolation,
                next_tx_id: 1,
                transactions: HashMap::new(),
                store: HashMap::new(),
            })),
        }
    }

    pub fn begin(&self) -> RSKVResult<MvccTransaction> {
        MvccTransaction::begin(self.inner.clone())
    }
}

pub struct MvccTransaction {
    inner: Arc<Mutex<MvccInner>>,
    id: TxId,
}

impl MvccTransaction {
    // 开启事务
    pub fn begin(inner: Arc<Mutex<MvccInner>>) -> RSKVResult<Self> {
        let mut eng = inner.lock()?;
        // 快照当前活跃事务列表，和 ID 分配在同一把锁内完成
        let inprogress = eng
            .transactions
            .iter()
            .filter(|(_, t)| t.state == TransactionState::InProgress)
            .map(|(id, _)| *id)
            .collect();
        let id = eng.next_tx_id;
        eng.next_tx_id += 1;
        let isolation_level = eng.default_isolation;
        eng.transactions.insert(
            id,
            Transaction {
                id,
                isolation_level,
                state: TransactionState::InProgress,
                inprogress,
                writeset: HashSet::new(),
                readset: HashSet::new(),
            },
        );
        drop(eng);
        Ok(Self { inner, id })
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    // 提交事务，Snapshot/Serializable 在这里做冲突检测
    pub fn commit(&self) -> RSKVResult<()> {
        let mut eng = self.inner.lock()?;
        eng.complete(self.id, TransactionState::Committed)
    }

    // 回滚事务
    pub fn rollback(&self) -> RSKVResult<()> {
        let mut eng = self.inner.lock()?;
        eng.complete(self.id, TransactionState::Aborted)
    }

    pub fn set(&self, key: Key, value: Value) -> RSKVResult<()> {
        self.write_inner(key, Some(value))
    }

    pub fn delete(&self, key: Key) -> RSKVResult<()> {
        self.write_inner(key, None)
    }

    pub fn get(&self, key: Key) -> RSKVResult<Value> {
        let mut eng = self.inner.lock()?;
        let MvccInner {
            transactions,
            store,
            ..
        } = &mut *eng;
        let t = active_transaction(transactions, self.id)?;
        // 读集在查找之前记录，读不到的 key 也参与 Serializable 的冲突检测
        if let Some(rt) = transactions.get_mut(&self.id) {
            rt.readset.insert(key.clone());
        }
        // 从最新的版本开始查找，返回第一个可见版本
        if let Some(chain) = store.get(&key) {
            for version in chain.iter().rev() {
                if visible(transactions, &t, version)? {
                    return Ok(version.value.clone());
                }
            }
        }
        Err(RSKVError::KeyNotFound(
            "cannot get key that does not exist".into(),
        ))
    }

    // 更新 / 删除 数据
    fn write_inner(&self, key: Key, value: Option<Value>) -> RSKVResult<()> {
        let mut eng = self.inner.lock()?;
        let MvccInner {
            transactions,
            store,
            ..
        } = &mut *eng;
        let t = active_transaction(transactions, self.id)?;
        let chain = store.entry(key.clone()).or_default();
        // 从最新的版本开始，把所有可见版本标记为被当前事务终结
        let mut superseded = false;
        for version in chain.iter_mut().rev() {
            if visible(transactions, &t, version)? {
                version.tx_end_id = self.id;
                superseded = true;
            }
        }
        match value {
            // set 追加新版本
            Some(value) => chain.push(Version {
                tx_start_id: self.id,
                tx_end_id: 0,
                value,
            }),
            // delete 没有可见版本可删，写集保持不变
            None if !superseded => {
                return Err(RSKVError::KeyNotFound(
                    "cannot delete key that does not exist".into(),
                ));
            }
            None => {}
        }
        if let Some(wt) = transactions.get_mut(&self.id) {
            wt.writeset.insert(key);
        }
        Ok(())
    }
}

impl MvccInner {
    // 结束事务，提交前先做隔离级别对应的冲突检测，冲突则转为 Aborted
    fn complete(&mut self, id: TxId, target: TransactionState) -> RSKVResult<()> {
        let t = active_transaction(&self.transactions, id)?;
        if target == TransactionState::Committed {
            if let Err(e) = self.check_conflicts(&t) {
                if let Some(t) = self.transactions.get_mut(&id) {
                    t.state = TransactionState::Aborted;
                }
                return Err(e);
            }
        }
        if let Some(t) = self.transactions.get_mut(&id) {
            t.state = target;
        }
        Ok(())
    }

    // 提交时冲突检测，只对 Snapshot 和 Serializable 生效
    fn check_conflicts(&self, t: &Transaction) -> RSKVResult<()> {
        match t.isolation_level {
            IsolationLevel::Snapshot | IsolationLevel::Serializable => {}
            _ => return Ok(()),
        }
        // 候选集：生命周期与 t 重叠且已经提交的事务
        // begin 时活跃的事务，加上 t 之后开启的所有事务
        for id in t.inprogress.iter().copied().chain(t.id + 1..self.next_tx_id) {
            let u = match self.transactions.get(&id) {
                Some(u) => u,
                None => {
                    return Err(RSKVError::Internal(format!(
                        "transaction {} does not exist",
                        id
                    )));
                }
            };
            if u.state != TransactionState::Committed {
                continue;
            }
            match t.isolation_level {
                IsolationLevel::Snapshot => {
                    if !t.writeset.is_disjoint(&u.writeset) {
                        return Err(RSKVError::WriteConflict);
                    }
                }
                IsolationLevel::Serializable => {
                    if !t.readset.is_disjoint(&u.writeset) || !t.writeset.is_disjoint(&u.readset) {
                        return Err(RSKVError::ReadConflict);
                    }
                    // 读写检测之外仍需覆盖纯写写覆盖
                    if !t.writeset.is_disjoint(&u.writeset) {
                        return Err(RSKVError::WriteConflict);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

// 获取处于 InProgress 状态的事务信息
fn active_transaction(
    transactions: &HashMap<TxId, Transaction>,
    id: TxId,
) -> RSKVResult<Transaction> {
    match transactions.get(&id) {
        Some(t) if t.state == TransactionState::InProgress => Ok(t.clone()),
        Some(t) => Err(RSKVError::Internal(format!(
            "transaction {} is not in progress",
            t.id
        ))),
        None => Err(RSKVError::Internal(format!(
            "transaction {} does not exist",
            id
        ))),
    }
}

// 查询事务状态，事务表中不存在视为内部错误
fn tx_state(transactions: &HashMap<TxId, Transaction>, id: TxId) -> RSKVResult<TransactionState> {
    match transactions.get(&id) {
        Some(t) => Ok(t.state),
        None => Err(RSKVError::Internal(format!(
            "transaction {} does not exist",
            id
        ))),
    }
}

// 可见性判断，按事务的隔离级别分派
fn visible(
    transactions: &HashMap<TxId, Transaction>,
    t: &Transaction,
    version: &Version,
) -> RSKVResult<bool> {
    match t.isolation_level {
        // 未删除即可见，不管创建者是否提交
        IsolationLevel::ReadUncommitted => Ok(version.tx_end_id == 0),
        // 创建者和删除者的状态在每次查询时重新读取
        IsolationLevel::ReadCommitted => {
            if version.tx_start_id != t.id
                && tx_state(transactions, version.tx_start_id)? != TransactionState::Committed
            {
                return Ok(false);
            }
            if version.tx_end_id == t.id {
                return Ok(false);
            }
            if version.tx_end_id > 0
                && tx_state(transactions, version.tx_end_id)? == TransactionState::Committed
            {
                return Ok(false);
            }
            Ok(true)
        }
        // RepeatableRead / Snapshot / Serializable 共用快照谓词
        // 视图固定在 begin 时刻：之后开启的事务和当时活跃的事务都不可见
        _ => {
            if version.tx_start_id > t.id {
                return Ok(false);
            }
            if t.inprogress.contains(&version.tx_start_id) {
                return Ok(false);
            }
            if version.tx_start_id != t.id
                && tx_state(transactions, version.tx_start_id)? != TransactionState::Committed
            {
                return Ok(false);
            }
            if version.tx_end_id == t.id {
                return Ok(false);
            }
            // 并发事务的删除不影响当前事务的视图
            if version.tx_end_id > 0
                && version.tx_end_id < t.id
                && tx_state(transactions, version.tx_end_id)? == TransactionState::Committed
                && !t.inprogress.contains(&version.tx_end_id)
            {
                return Ok(false);
            }
            Ok(true)
        }
    }
}
