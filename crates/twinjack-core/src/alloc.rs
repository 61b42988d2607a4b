//! Role-to-interface allocation.
//!
//! Pure matching over the discovered interface list: no side effects, no
//! mode switching. Roles are filled in fixed priority order (AP, DEAUTH,
//! VERIFY, INTERNET); an interface already bound to another role is only
//! reused as a last resort, and that reuse is recorded as a degraded-mode
//! warning on the session.

use std::collections::BTreeMap;

use crate::error::AllocationError;
use crate::types::{InterfaceInfo, Role, RoleAssignment};

/// One requested role, optionally pinned to an operator-chosen interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRequest {
    pub role: Role,
    pub pinned: Option<String>,
}

impl RoleRequest {
    pub fn auto(role: Role) -> Self {
        Self { role, pinned: None }
    }

    pub fn pinned(role: Role, interface: impl Into<String>) -> Self {
        Self {
            role,
            pinned: Some(interface.into()),
        }
    }
}

/// Result of a successful allocation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub assignments: Vec<RoleAssignment>,
    pub warnings: Vec<String>,
}

impl Allocation {
    pub fn interface_for(&self, role: Role) -> Option<&str> {
        self.assignments
            .iter()
            .find(|a| a.role == role)
            .map(|a| a.interface.as_str())
    }

    pub fn is_degraded(&self, role: Role) -> bool {
        self.assignments
            .iter()
            .any(|a| a.role == role && a.degraded)
    }
}

/// Assign interfaces to the requested roles.
///
/// Fails with [`AllocationError::NoCandidate`] only when no interface at
/// all (assigned or not) satisfies a role's required capability.
pub fn allocate(
    requests: &[RoleRequest],
    interfaces: &[InterfaceInfo],
) -> Result<Allocation, AllocationError> {
    if interfaces.is_empty() {
        return Err(AllocationError::NoInterfaces);
    }

    let by_role: BTreeMap<Role, &RoleRequest> =
        requests.iter().map(|r| (r.role, r)).collect();

    let mut sorted: Vec<&InterfaceInfo> = interfaces.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut assignments: Vec<RoleAssignment> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();
    let mut taken: Vec<String> = Vec::new();

    for role in Role::PRIORITY {
        let Some(request) = by_role.get(&role) else {
            continue;
        };

        let mut chosen: Option<(&InterfaceInfo, bool)> = None;

        if let Some(pinned) = &request.pinned {
            match sorted.iter().find(|i| &i.name == pinned) {
                Some(iface) if iface.satisfies(role) => {
                    let degraded = taken.contains(&iface.name);
                    if degraded {
                        warnings.push(format!(
                            "interface {} pinned for {} is already assigned to another role",
                            iface.name, role
                        ));
                    }
                    chosen = Some((*iface, degraded));
                }
                _ => {
                    warnings.push(format!(
                        "requested {} interface {:?} is missing or lacks {}; auto-selecting",
                        role,
                        pinned,
                        role.capability_name()
                    ));
                }
            }
        }

        if chosen.is_none() {
            // Prefer an interface not yet bound to any role.
            chosen = sorted
                .iter()
                .find(|i| i.satisfies(role) && !taken.contains(&i.name))
                .map(|i| (*i, false));
        }

        if chosen.is_none() {
            // Degraded fallback: reuse an already-assigned interface.
            chosen = sorted
                .iter()
                .find(|i| i.satisfies(role))
                .map(|i| (*i, true));
            if let Some((iface, _)) = chosen {
                warnings.push(format!(
                    "reusing {} for {} (no dedicated interface available)",
                    iface.name, role
                ));
            }
        }

        match chosen {
            Some((iface, degraded)) => {
                if !taken.contains(&iface.name) {
                    taken.push(iface.name.clone());
                }
                assignments.push(RoleAssignment {
                    role,
                    interface: iface.name.clone(),
                    degraded,
                });
            }
            None => {
                return Err(AllocationError::NoCandidate {
                    role,
                    capability: role.capability_name(),
                });
            }
        }
    }

    Ok(Allocation {
        assignments,
        warnings,
    })
}
