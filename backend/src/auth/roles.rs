use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    // Web client routes still say "teacher" for staff accounts.
    #[serde(alias = "teacher")]
    Agent,
    DepartmentHead,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Agent => "agent",
            Role::DepartmentHead => "department_head",
            Role::Admin => "admin",
        }
    }

    pub fn is_staff(self) -> bool {
        !matches!(self, Role::Student)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "student" => Ok(Role::Student),
            "agent" | "teacher" => Ok(Role::Agent),
            "department_head" => Ok(Role::DepartmentHead),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

pub const EVERYONE: &[Role] = &[Role::Admin, Role::DepartmentHead, Role::Agent, Role::Student];
pub const STAFF: &[Role] = &[Role::Admin, Role::DepartmentHead, Role::Agent];
pub const MANAGERS: &[Role] = &[Role::Admin, Role::DepartmentHead];
pub const ADMIN_ONLY: &[Role] = &[Role::Admin];
