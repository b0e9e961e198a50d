//! Interfaces to the outside world that a [Context](crate::Context) is built on: the local
//! [Principal], the shared [Namespace] that participants mount themselves in, and the RPC
//! [Transport] used to serve and call message endpoints

pub mod namespace;
pub mod principal;
pub mod transport;

pub use namespace::{GlobReply, MountEntry, MountedServer, Namespace, NamespaceError};
pub use principal::{Principal, StaticPrincipal};
pub use transport::{
    Authorizer, DispatchError, Dispatcher, ListenSpec, ServerCall, Transport, TransportError,
};

/// Separator between the components of a name in the namespace
pub const NAME_SEPARATOR: char = '/';

/// Join two names with a single separator between them
pub fn join_name(base: &str, suffix: &str) -> String {
    let base = base.trim_end_matches(NAME_SEPARATOR);
    let suffix = suffix.trim_start_matches(NAME_SEPARATOR);
    match (base.is_empty(), suffix.is_empty()) {
        (true, _) => suffix.to_owned(),
        (_, true) => base.to_owned(),
        _ => format!("{}{}{}", base, NAME_SEPARATOR, suffix),
    }
}
