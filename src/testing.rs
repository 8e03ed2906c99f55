//! In-memory host and fixtures shared by the unit tests

use std::collections::HashMap;

use crate::domain::{BalanceFields, DomainObject, Increment, ObjectRef, ObjectTable, ObjectTables, Role};
use crate::fingerprint::registry::{FingerprintSet, KnownFingerprint};
use crate::fingerprint::FingerprintEngine;
use crate::host::{BodyAccess, FunctionHandle, FunctionTable, Functions, UnresolvedTarget};
use crate::instrument::{
    HookId, HookInstallError, HookRequest, Instrumentation, InstrumentationRecord, Owner,
};

/// push rbp; mov rbp, rsp; call rel32; add eax, 1; pop rbp; ret
pub(crate) const TOOLTIP: [u8; 15] = [
    0x55, 0x48, 0x89, 0xe5, 0xe8, 0x00, 0x10, 0x00, 0x00, 0x83, 0xc0, 0x01, 0x5d, 0xc3, 0xcc,
];

/// sub rsp, 0x28; mov rax, [rip+disp32]; test rax, rax; je +4; add rsp, 0x28; ret
pub(crate) const BOMBARD: [u8; 21] = [
    0x48, 0x83, 0xec, 0x28, 0x48, 0x8b, 0x05, 0x10, 0x20, 0x00, 0x00, 0x48, 0x85, 0xc0, 0x74,
    0x00, 0x48, 0x83, 0xc4, 0x28, 0xc3,
];

/// Host that keeps bodies and hooks in memory and counts install calls
#[derive(Default)]
pub(crate) struct MockHost {
    /// Registered functions
    functions: FunctionTable,
    /// Bodies keyed by address
    bodies: HashMap<usize, Vec<u8>>,
    /// Installed hooks keyed by address
    hooks: HashMap<usize, Vec<(HookId, Owner, HookRequest)>>,
    /// Id handed to the next installed hook
    next_id: u64,
    /// Domain objects
    objects: ObjectTable,
    /// Number of `install_hook` calls, failed ones included
    installs: usize,
    /// Address whose installs fail
    fail_at: Option<usize>,
}
impl MockHost {
    /// Creates an empty host
    pub(crate) fn new() -> Self {
        Self::default()
    }
    /// Registers (or replaces) the function `id` at `address`
    pub(crate) fn add_function(&mut self, id: &str, address: usize, body: Vec<u8>) -> FunctionHandle {
        let handle = FunctionHandle::new(address, body.len());
        self.functions.register(id, handle);
        self.bodies.insert(address, body);
        handle
    }
    /// Handle of a registered function
    pub(crate) fn handle(&self, id: &str) -> FunctionHandle {
        self.functions.function(id).unwrap()
    }
    /// Domain object table
    pub(crate) fn objects(&mut self) -> &mut ObjectTable {
        &mut self.objects
    }
    /// Number of `install_hook` calls so far
    pub(crate) fn installs(&self) -> usize {
        self.installs
    }
    /// Makes every install on `address` fail
    pub(crate) fn fail_installs_at(&mut self, address: usize) {
        self.fail_at = Some(address);
    }
}
impl Functions for MockHost {
    fn function(&self, id: &str) -> Option<FunctionHandle> {
        self.functions.function(id)
    }
}
impl BodyAccess for MockHost {
    fn read_body(&self, handle: &FunctionHandle) -> Result<Vec<u8>, UnresolvedTarget> {
        self.bodies
            .get(&handle.address())
            .filter(|body| body.len() == handle.size())
            .cloned()
            .ok_or(UnresolvedTarget::BodyUnreadable {
                address: handle.address(),
                size: handle.size(),
            })
    }
}
impl Instrumentation for MockHost {
    fn instrumentation(&self, handle: &FunctionHandle) -> InstrumentationRecord {
        let mut record = InstrumentationRecord::new();
        for (_, owner, hook) in self.hooks.get(&handle.address()).into_iter().flatten() {
            record.push(owner.clone(), hook.kind);
        }
        record
    }

    fn install_hook(
        &mut self,
        handle: &FunctionHandle,
        owner: &Owner,
        hook: HookRequest,
    ) -> Result<HookId, HookInstallError> {
        self.installs += 1;
        if self.fail_at == Some(handle.address()) {
            return Err(HookInstallError::Patch(String::from("incompatible calling convention")));
        }
        let id = HookId::new(self.next_id);
        self.next_id += 1;
        self.hooks
            .entry(handle.address())
            .or_default()
            .push((id, owner.clone(), hook));
        Ok(id)
    }

    fn remove_hook(&mut self, handle: &FunctionHandle, id: HookId) {
        if let Some(hooks) = self.hooks.get_mut(&handle.address()) {
            hooks.retain(|(installed, _, _)| *installed != id);
        }
    }
}
impl ObjectTables for MockHost {
    fn find_first(&self, predicate: &dyn Fn(&DomainObject) -> bool) -> Option<ObjectRef> {
        self.objects.find_first(predicate)
    }
}

/// Fingerprints accepting the body currently registered as `id`; empty if there is none
pub(crate) fn known(host: &MockHost, id: &str) -> FingerprintSet {
    let mut known = FingerprintSet::empty();
    if let Some(handle) = host.function(id) {
        let digest = FingerprintEngine::<crate::fingerprint::arch::X64>::new()
            .fingerprint(host, &handle)
            .unwrap();
        known.push(KnownFingerprint {
            edition: "current",
            digest,
        });
    }
    known
}

/// Scout perk as shipped: +15% hitpoints for party members
pub(crate) fn healthy_scout() -> DomainObject {
    DomainObject::new(
        "dDKOoD3e",
        BalanceFields {
            name: String::from("Healthy Scout"),
            description: String::from("+{a0}% hitpoints for party members"),
            skill: String::from("Scouting"),
            required_value: 50,
            alternative: Some(String::from("dVoLvRKi")),
            primary_role: Role::PartyMember,
            primary_bonus: 0.15,
            secondary_role: Role::None,
            secondary_bonus: 0.0,
            increment: Increment::AddFactor,
        },
    )
}
