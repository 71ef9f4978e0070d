//! Worker listening mode and remote-call dispatch.
//!
//! While a listen session is active, every worker blocks on a broadcast
//! receive and decodes each message either as a call to execute locally
//! or as the session's private exit key. The controller drives the
//! session and is the only rank that can end it. Sessions may nest on the
//! controller; only the outermost exit releases the workers.
//!
//! The exit key is broadcast on every controller code path — normal
//! return, error return and unwind (via a drop guard) — because a worker
//! blocked in a broadcast that is never matched would deadlock the whole
//! group.

use crate::comm::{Payload, ProcessGroup, Role};
use crate::models::{EikasiaError, Result};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, error};

/// A message broadcast to listening workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Directive<C> {
    /// Execute a call locally.
    Call {
        /// The call to execute.
        call: C,
        /// If true, the controller does not execute the call itself.
        workers_only: bool,
    },
    /// End the listen session with the given key.
    Exit(u32),
}

/// Remote-call dispatch over a process group.
///
/// Implementors supply the group handle, an explicit stack of session
/// keys and the local call executor; the provided methods implement the
/// listen-mode protocol once for all of them.
pub trait Dispatch {
    /// The call descriptor broadcast to workers.
    type Call: Payload + Clone;
    /// The rank-local result of executing a call. Never synchronized:
    /// callers needing agreement must gather or barrier explicitly.
    type Reply;
    /// The underlying process group.
    type Group: ProcessGroup;

    /// The group handle.
    fn comm(&self) -> &Arc<Self::Group>;

    /// The stack of active session keys on this rank.
    fn sessions(&self) -> &Vec<u32>;

    /// Mutable access to the session stack.
    fn sessions_mut(&mut self) -> &mut Vec<u32>;

    /// Execute a call on this rank.
    fn execute(&mut self, call: Self::Call) -> Result<Self::Reply>;

    /// Whether a listen session is active on this rank.
    fn listening(&self) -> bool {
        !self.sessions().is_empty()
    }

    /// Enter worker listening mode, run `body` on the controller, and
    /// release the workers again.
    ///
    /// Returns `Some(result)` on the controller and `None` on workers.
    /// Entering while a session is already active is controller-side
    /// bookkeeping only — workers are already listening and see nothing
    /// until the outermost exit.
    fn with_worker_mode<R>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<Option<R>>
    where
        Self: Sized,
    {
        let group = Arc::clone(self.comm());
        let nested = self.listening();
        if !nested {
            group.barrier()?;
        }

        match group.role() {
            Role::Controller => {
                let key: u32 = rand::random();
                if !nested {
                    group.broadcast(Some(key))?;
                }
                self.sessions_mut().push(key);
                debug!(key, nested, "listen session opened");

                let mut guard = ExitGuard::<Self::Group, Self::Call> {
                    group: &*group,
                    key,
                    outermost: !nested,
                    armed: true,
                    _call: PhantomData,
                };
                let result = body(self);
                guard.armed = false;

                self.sessions_mut().pop();
                if !nested {
                    // Explicit exit on the Ok and Err paths so broadcast
                    // failures surface; the guard only fires on unwind.
                    group.broadcast(Some(Directive::<Self::Call>::Exit(key)))?;
                    group.barrier()?;
                }
                debug!(key, "listen session closed");
                result.map(Some)
            }
            Role::Worker => {
                let key: u32 = group.broadcast(None)?;
                self.sessions_mut().push(key);
                let served = self.listen(&group, key);
                self.sessions_mut().pop();
                group.barrier()?;
                served?;
                Ok(None)
            }
        }
    }

    /// Worker loop: execute broadcast calls until the exit key arrives.
    fn listen(&mut self, group: &Arc<Self::Group>, key: u32) -> Result<()>
    where
        Self: Sized,
    {
        loop {
            match group.broadcast::<Directive<Self::Call>>(None)? {
                Directive::Exit(k) if k == key => return Ok(()),
                Directive::Exit(_) => return Err(EikasiaError::SessionKeyMismatch),
                Directive::Call { call, .. } => {
                    self.execute(call)?;
                }
            }
        }
    }

    /// Broadcast a call to all ranks and execute it locally as well.
    ///
    /// Outside a listen session this degrades to plain local execution;
    /// all ranks are then running the same program line in lockstep.
    fn make_call(&mut self, call: Self::Call) -> Result<Self::Reply>
    where
        Self: Sized,
    {
        if self.listening() && self.comm().is_controller() {
            let directive = Directive::Call {
                call: call.clone(),
                workers_only: false,
            };
            Arc::clone(self.comm()).broadcast(Some(directive))?;
        }
        self.execute(call)
    }

    /// Broadcast a call for execution on workers only.
    ///
    /// Returns the rank-local reply on executing ranks, `None` on the
    /// controller.
    fn make_call_workers(&mut self, call: Self::Call) -> Result<Option<Self::Reply>>
    where
        Self: Sized,
    {
        if self.listening() && self.comm().is_controller() {
            let directive = Directive::Call {
                call,
                workers_only: true,
            };
            Arc::clone(self.comm()).broadcast(Some(directive))?;
            Ok(None)
        } else if self.comm().role() == Role::Worker {
            self.execute(call).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Releases listening workers if the controller unwinds mid-session.
struct ExitGuard<'a, G: ProcessGroup, C: Payload> {
    group: &'a G,
    key: u32,
    outermost: bool,
    armed: bool,
    _call: PhantomData<C>,
}

impl<G: ProcessGroup, C: Payload> Drop for ExitGuard<'_, G, C> {
    fn drop(&mut self) {
        if self.armed && self.outermost {
            if let Err(e) = self
                .group
                .broadcast(Some(Directive::<C>::Exit(self.key)))
            {
                error!(error = %e, "failed to release workers during unwind");
            }
            let _ = self.group.barrier();
        }
    }
}
