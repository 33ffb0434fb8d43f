//! Statement ledger
//!
//! Every change a transaction makes is one [`Statement`] in its ordered
//! ledger. Statements nest: [`TxManager::begin_statement`] records the ledger
//! length, and rolling that statement back undoes everything issued since,
//! in reverse order.

use strata_core::{Error, Result, SpaceId, Tuple};
use strata_durability::{RedoRow, RequestType};

use crate::arena::Id;
use crate::manager::TxManager;
use crate::story::StoryId;
use crate::transaction::{TxnId, TxnStatus};

/// Handle to a statement
pub type StmtId = Id<Statement>;

/// One operation inside a transaction
#[derive(Debug)]
pub struct Statement {
    pub(crate) txn: TxnId,
    pub(crate) space: Option<SpaceId>,
    pub(crate) old_tuple: Option<Tuple>,
    pub(crate) new_tuple: Option<Tuple>,
    pub(crate) add_story: Option<StoryId>,
    pub(crate) del_story: Option<StoryId>,
    pub(crate) row: Option<RedoRow>,
    pub(crate) requires_old_tuple: bool,
}

impl Statement {
    pub(crate) fn new(txn: TxnId, space: Option<SpaceId>) -> Self {
        Statement {
            txn,
            space,
            old_tuple: None,
            new_tuple: None,
            add_story: None,
            del_story: None,
            row: None,
            requires_old_tuple: false,
        }
    }

    /// Owning transaction
    pub fn txn(&self) -> TxnId {
        self.txn
    }

    /// Target space, `None` for a space-less statement
    pub fn space(&self) -> Option<SpaceId> {
        self.space
    }

    /// Tuple the statement replaced or deleted, as visible to it
    pub fn old_tuple(&self) -> Option<&Tuple> {
        self.old_tuple.as_ref()
    }

    /// Tuple the statement installed
    pub fn new_tuple(&self) -> Option<&Tuple> {
        self.new_tuple.as_ref()
    }

    /// Story created for the new tuple
    pub fn add_story(&self) -> Option<StoryId> {
        self.add_story
    }

    /// Story of the deleted tuple
    pub fn del_story(&self) -> Option<StoryId> {
        self.del_story
    }

    /// Redo row built at statement commit
    pub fn row(&self) -> Option<&RedoRow> {
        self.row.as_ref()
    }

    /// Whether the result depends on the exact old tuple
    pub fn requires_old_tuple(&self) -> bool {
        self.requires_old_tuple
    }
}

/// Origin of a statement's redo row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// Request kind
    pub request_type: RequestType,
    /// 0 for local requests, the origin replica otherwise
    pub replica_id: u32,
    /// LSN on the origin replica
    pub lsn: i64,
    /// Row is never replicated
    pub group_local: bool,
}

impl Request {
    /// Locally issued request
    pub fn local(request_type: RequestType) -> Self {
        Request {
            request_type,
            replica_id: 0,
            lsn: 0,
            group_local: false,
        }
    }

    /// Request replayed from another replica
    pub fn applier(request_type: RequestType, replica_id: u32, lsn: i64) -> Self {
        Request {
            request_type,
            replica_id,
            lsn,
            group_local: false,
        }
    }

    /// Mark the row as never replicated (builder pattern)
    pub fn group_local(mut self) -> Self {
        self.group_local = true;
        self
    }
}

impl TxManager {
    /// Open a statement
    ///
    /// Fails once nesting reaches `max_sub_statements`, and for a
    /// conflicted transaction.
    pub fn begin_statement(&mut self, txn: TxnId, space: Option<SpaceId>) -> Result<StmtId> {
        if let Some(space) = space {
            self.space_ref(space)?;
        }
        let max = self.config.max_sub_statements;
        let t = self.txn_ref(txn)?;
        if t.sub_stmt_begin.len() >= max {
            return Err(Error::TooManyNestedStatements { max });
        }
        if t.aborted_by_yield {
            return Err(Error::TransactionYield);
        }
        match t.status {
            TxnStatus::Conflicted => return Err(Error::TransactionConflict),
            TxnStatus::InProgress | TxnStatus::InReadView => {}
            status => {
                return Err(Error::InvalidOperation(format!(
                    "cannot begin a statement in a {} transaction",
                    status.as_str()
                )))
            }
        }
        let stmt = self.stmts.insert(Statement::new(txn, space));
        let t = &mut self.txns[txn];
        t.sub_stmt_begin.push(t.stmts.len());
        t.stmts.push(stmt);
        Ok(stmt)
    }

    /// Mark that the statement's outcome depends on the exact old tuple
    ///
    /// A concurrent writer overtaken by such a statement at prepare is
    /// conflicted outright.
    pub fn set_requires_old_tuple(&mut self, stmt: StmtId, requires: bool) -> Result<()> {
        let s = self.stmts.get_mut(stmt).ok_or(Error::NoSuchTransaction)?;
        s.requires_old_tuple = requires;
        Ok(())
    }

    /// Close the innermost open statement, building its redo row
    ///
    /// Statements on temporary spaces produce no row. A failure rolls the
    /// statement back.
    pub fn commit_statement(&mut self, stmt: StmtId, request: Request) -> Result<()> {
        let txn = self.innermost_statement_txn(stmt)?;
        let row = match self.build_redo_row(stmt, request) {
            Ok(row) => row,
            Err(e) => {
                self.rollback_statement(stmt)?;
                return Err(e);
            }
        };
        let t = &mut self.txns[txn];
        if let Some(row) = &row {
            if row.is_local() {
                t.n_new_rows += 1;
                if row.group_local {
                    t.n_local_rows += 1;
                }
            } else {
                t.n_applier_rows += 1;
            }
        }
        t.sub_stmt_begin.pop();
        self.stmts[stmt].row = row;
        Ok(())
    }

    /// Undo the innermost open statement and everything issued inside it
    pub fn rollback_statement(&mut self, stmt: StmtId) -> Result<()> {
        let txn = self.innermost_statement_txn(stmt)?;
        let begin = match self.txns[txn].sub_stmt_begin.pop() {
            Some(begin) => begin,
            None => return Ok(()),
        };
        self.rollback_to(txn, begin);
        Ok(())
    }

    /// Look up a statement
    pub fn statement(&self, stmt: StmtId) -> Option<&Statement> {
        self.stmts.get(stmt)
    }

    fn innermost_statement_txn(&self, stmt: StmtId) -> Result<TxnId> {
        let s = self.stmts.get(stmt).ok_or(Error::NoSuchTransaction)?;
        let t = self.txn_ref(s.txn)?;
        let innermost = t
            .sub_stmt_begin
            .last()
            .and_then(|&begin| t.stmts.get(begin))
            .copied();
        if innermost != Some(stmt) {
            return Err(Error::InvalidOperation(
                "statement is not the innermost open statement".into(),
            ));
        }
        Ok(s.txn)
    }

    fn build_redo_row(&self, stmt: StmtId, request: Request) -> Result<Option<RedoRow>> {
        let s = &self.stmts[stmt];
        if let Some(space) = s.space {
            if self.space_ref(space)?.def().is_temporary {
                return Ok(None);
            }
        }
        let mut row = RedoRow::new(request.request_type, s.space);
        row.replica_id = request.replica_id;
        row.lsn = request.lsn;
        row.group_local = request.group_local;
        row.old_tuple = s.old_tuple.as_ref().map(Tuple::encode).transpose()?;
        row.new_tuple = s.new_tuple.as_ref().map(Tuple::encode).transpose()?;
        Ok(Some(row))
    }

    /// Undo and drop every statement past ledger position `len`
    pub(crate) fn rollback_to(&mut self, txn: TxnId, len: usize) {
        let tail = {
            let t = &mut self.txns[txn];
            if len >= t.stmts.len() {
                return;
            }
            t.stmts.split_off(len)
        };
        for stmt in tail.into_iter().rev() {
            self.rollback_stmt_history(stmt);
            if let Some(Statement { row: Some(row), .. }) = self.stmts.remove(stmt) {
                let t = &mut self.txns[txn];
                if row.is_local() {
                    t.n_new_rows -= 1;
                    if row.group_local {
                        t.n_local_rows -= 1;
                    }
                } else {
                    t.n_applier_rows -= 1;
                }
            }
        }
        let t = &mut self.txns[txn];
        let remaining = t.stmts.len();
        t.sub_stmt_begin.retain(|&begin| begin <= remaining);
    }
}
