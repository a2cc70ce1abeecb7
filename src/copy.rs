//! COPY members: named, cached statement streams.

use std::rc::Rc;

use crate::ids::IdIndex;
use crate::location::Location;
use crate::statement::Statement;

#[derive(Clone, Debug)]
pub struct CopyMember {
    pub name: IdIndex,
    pub body: Rc<Vec<Statement>>,
    pub location: Location,
}

/// One active inclusion of a member, living on the copy stack of a source
/// frame or macro invocation.
#[derive(Clone, Debug)]
pub struct CopyFrame {
    pub member: IdIndex,
    pub body: Rc<Vec<Statement>>,
    pub file: String,
    pub current: usize,
}

impl CopyFrame {
    pub fn enter(member: &CopyMember) -> CopyFrame {
        CopyFrame {
            member: member.name,
            body: Rc::clone(&member.body),
            file: member.location.file.clone(),
            current: 0,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.current >= self.body.len()
    }
}
