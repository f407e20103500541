#![allow(dead_code)]

//! Scripted collaborators for executor tests.
//!
//! The connector, database and engine here share one record so tests can see
//! how often the database was opened and closed and which mode ran.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::engine::{
    cause, ChangeSetRef, ConnectionParams, Contexts, Database, DatabaseConnector, EngineFactory,
    MigrationEngine, ResourceAccessor,
};
use crate::error::Error;
use crate::executor::{MigrationExecutor, MigrationMode};
use crate::listener::ChangeSetListener;

pub(crate) fn changeset(id: &str) -> ChangeSetRef {
    ChangeSetRef::new(id, "tester", "db/master.xml")
}

/// One thing the scripted engine does, in order.
pub(crate) enum Step {
    Execute(ChangeSetRef),
    Fail(Error),
}

#[derive(Default)]
struct Record {
    connects: usize,
    closes: usize,
    modes: Vec<MigrationMode>,
    last_params: Option<ConnectionParams>,
}

pub(crate) struct TestHarness {
    script: Rc<dyn Fn() -> Vec<Step>>,
    record: Rc<RefCell<Record>>,
    fail_connect: bool,
    fail_engine_init: bool,
    fail_close: bool,
}

impl TestHarness {
    pub fn new(script: impl Fn() -> Vec<Step> + 'static) -> Self {
        Self {
            script: Rc::new(script),
            record: Rc::default(),
            fail_connect: false,
            fail_engine_init: false,
            fail_close: false,
        }
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn failing_engine_init(mut self) -> Self {
        self.fail_engine_init = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn executor(&self) -> MigrationExecutor {
        MigrationExecutor::new(
            TestConnector {
                record: Rc::clone(&self.record),
                fail_connect: self.fail_connect,
                fail_close: self.fail_close,
            },
            ScriptedFactory {
                script: Rc::clone(&self.script),
                record: Rc::clone(&self.record),
                fail_engine_init: self.fail_engine_init,
            },
        )
    }

    pub fn connects(&self) -> usize {
        self.record.borrow().connects
    }

    pub fn closes(&self) -> usize {
        self.record.borrow().closes
    }

    pub fn modes(&self) -> Vec<MigrationMode> {
        self.record.borrow().modes.clone()
    }

    pub fn last_params(&self) -> Option<ConnectionParams> {
        self.record.borrow().last_params.clone()
    }
}

struct TestConnector {
    record: Rc<RefCell<Record>>,
    fail_connect: bool,
    fail_close: bool,
}

impl DatabaseConnector for TestConnector {
    fn connect(&self, params: &ConnectionParams) -> Result<Box<dyn Database>, Error> {
        let mut record = self.record.borrow_mut();
        record.connects += 1;
        record.last_params = Some(params.clone());
        if self.fail_connect {
            return Err(Error::DatabaseConnect(cause("database unreachable")));
        }
        Ok(Box::new(TestDatabase {
            record: Rc::clone(&self.record),
            fail_close: self.fail_close,
        }))
    }
}

struct TestDatabase {
    record: Rc<RefCell<Record>>,
    fail_close: bool,
}

impl Database for TestDatabase {
    fn close(&mut self) -> Result<(), Error> {
        self.record.borrow_mut().closes += 1;
        if self.fail_close {
            return Err(Error::Teardown(cause("connection already gone")));
        }
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct ScriptedFactory {
    script: Rc<dyn Fn() -> Vec<Step>>,
    record: Rc<RefCell<Record>>,
    fail_engine_init: bool,
}

impl EngineFactory for ScriptedFactory {
    fn create<'a>(
        &'a self,
        _changelog: &str,
        _resources: &'a dyn ResourceAccessor,
        _database: &'a mut dyn Database,
    ) -> Result<Box<dyn MigrationEngine + 'a>, Error> {
        if self.fail_engine_init {
            return Err(Error::EngineInit(cause("malformed changelog reference")));
        }
        Ok(Box::new(ScriptedEngine {
            steps: (self.script)(),
            record: Rc::clone(&self.record),
            listener: None,
        }))
    }
}

struct ScriptedEngine {
    steps: Vec<Step>,
    record: Rc<RefCell<Record>>,
    listener: Option<Box<dyn ChangeSetListener>>,
}

impl ScriptedEngine {
    fn play(&mut self, mode: MigrationMode) -> Result<(), Error> {
        self.record.borrow_mut().modes.push(mode);
        for step in std::mem::take(&mut self.steps) {
            match step {
                Step::Execute(changeset) => {
                    if let Some(listener) = &self.listener {
                        listener.on_changeset_executed(&changeset);
                    }
                }
                Step::Fail(error) => return Err(error),
            }
        }
        Ok(())
    }
}

impl MigrationEngine for ScriptedEngine {
    fn set_changeset_listener(&mut self, listener: Box<dyn ChangeSetListener>) {
        self.listener = Some(listener);
    }

    fn update(&mut self, _contexts: &Contexts) -> Result<(), Error> {
        self.play(MigrationMode::ForwardOnly)
    }

    fn update_testing_rollback(&mut self, _contexts: &Contexts) -> Result<(), Error> {
        self.play(MigrationMode::TestRollback)
    }
}
