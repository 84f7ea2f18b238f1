//! # wirekit - Context-Based Dependency Injection
//!
//! An in-process dependency-injection and event-routing runtime organized
//! around a hierarchy of contexts.
//!
//! ## Features
//!
//! - **Autowiring**: typed slots resolve against the current context and its
//!   ancestors, with deferred satisfaction when no match exists yet
//! - **Capability-based members**: one object may be a context member, a
//!   worker, an event receiver, an exception filter, and a bolt at once
//! - **Junction boxes**: typed event channels whose receivers stay reachable
//!   across the parent chain while their home context is initiated
//! - **Joinable shutdown**: outstanding-work accounting makes `wait` return
//!   exactly when a context's workers are quiescent and shutdown is signalled
//!
//! ## Basic example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wirekit::{Context, Member};
//!
//! struct Database;
//!
//! let ctx = Context::global().create::<MySigil>();
//!
//! // A slot that is not satisfiable yet:
//! let db = ctx.autowire::<Database>();
//! assert!(!db.is_satisfied());
//!
//! // Adding a member satisfies it retroactively:
//! ctx.add(Member::new(Arc::new(Database)))?;
//! assert!(db.is_satisfied());
//!
//! ctx.initiate();
//! ctx.signal_shutdown(true, wirekit::ShutdownMode::Graceful);
//! ```

// Capability contracts and the member builder
pub mod contracts;
pub use contracts::{
    AutowiringEvents, Bolt, ContextMember, CoreRunnable, ExceptionFilter, FiringSite,
    PacketFactory, PacketSubscriber,
};

pub mod member;
pub use member::Member;

// The context core
pub mod context;
pub use context::{Context, GlobalSigil, ShutdownMode, Sigil};

pub mod autowire;
pub use autowire::Autowired;

pub mod current;
pub use current::ScopedContext;

pub mod outstanding;
pub use outstanding::Outstanding;

pub mod errors;
pub use errors::{ContextError, Result};

pub mod handle;
pub use handle::{AnyHandle, ObjectId};

mod junction;
mod registry;
