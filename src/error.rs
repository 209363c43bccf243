//! Crate-wide error types.
//!
//! Invariant violations caused by a misbehaving collaborator (e.g. a
//! corrupt log handed back from storage) are not represented here: they
//! are raised with `panic!` at the call site instead of threaded through
//! `Result`.

error_chain! {
    errors {
        /// Allocation failure in a collaborator or in this crate.
        NoMem {
            description("out of memory")
        }
        /// A method argument violates a documented precondition.
        BadParam(msg: String) {
            description("invalid parameter")
            display("invalid parameter: {}", msg)
        }
        /// The requested operation is not allowed in the server's current state.
        Busy {
            description("server busy or in the wrong state for this operation")
        }
        /// A client operation was attempted on a server that is not the leader.
        NotLeader(hint: Option<u64>) {
            description("not the leader")
            display("not the leader (hint: {:?})", hint)
        }
        /// A proposal was accepted as leader but leadership was lost before it committed.
        LeadershipLost {
            description("leadership lost before the proposal committed")
        }
        /// The server is shutting down or has already closed.
        Shutdown {
            description("server is shut down")
        }
        /// A pending client request (submit, catch-up, transfer) was cancelled.
        Cancelled {
            description("operation cancelled")
        }
        /// A send could not reach its destination; the caller should retry via the normal timers.
        Noconnect {
            description("transient failure sending a message")
        }
        /// A collaborator (the `Io` or `StateMachine` implementation) reported a failure.
        IoFault(msg: String) {
            description("collaborator I/O fault")
            display("collaborator I/O fault: {}", msg)
        }
        /// The supplied configuration is structurally invalid.
        ConfigurationInvalid(msg: String) {
            description("invalid configuration")
            display("invalid configuration: {}", msg)
        }
    }
}
