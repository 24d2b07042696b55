//! Client credential surface.
//!
//! Sessions identify themselves with a credential bundle whose client
//! type determines whether the connection may write, whether it prefers
//! replicas, and whether it counts as an admin session. The migration
//! driver connects as [`ClientType::Migrator`].

use serde::{Deserialize, Serialize};

/// Kinds of clients a session can boot as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ClientType {
    #[default]
    Unknown,
    SystemInternal,
    Default,
    /// Interactive SQL shell
    Shell,
    ReadOnlyShell,
    ReadWriteBroker,
    ReadOnlyBroker,
    SlaveOnlyBroker,
    ReadWriteAdminUtility,
    ReadOnlyAdminUtility,
    AdminShell,
    /// Admin shell that may write on a slave
    AdminShellWriteOnSlave,
    LogCopier,
    ReadWriteBrokerReplicaOnly,
    ReadOnlyBrokerReplicaOnly,
    SlaveOnlyBrokerReplicaOnly,
    ReplicationBroker,
    /// Rebalance/migration row-copy driver
    Migrator,
    CreateDb,
}

impl ClientType {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientType::Unknown => "unknown",
            ClientType::SystemInternal => "system",
            ClientType::Default => "default",
            ClientType::Shell => "shell",
            ClientType::ReadOnlyShell => "read_only_shell",
            ClientType::ReadWriteBroker => "read_write_broker",
            ClientType::ReadOnlyBroker => "read_only_broker",
            ClientType::SlaveOnlyBroker => "slave_only_broker",
            ClientType::ReadWriteAdminUtility => "read_write_admin",
            ClientType::ReadOnlyAdminUtility => "read_only_admin",
            ClientType::AdminShell => "admin_shell",
            ClientType::AdminShellWriteOnSlave => "admin_shell_write_on_slave",
            ClientType::LogCopier => "log_copier",
            ClientType::ReadWriteBrokerReplicaOnly => "read_write_replica_only_broker",
            ClientType::ReadOnlyBrokerReplicaOnly => "read_replica_only_broker",
            ClientType::SlaveOnlyBrokerReplicaOnly => "slave_replica_only_broker",
            ClientType::ReplicationBroker => "replication_broker",
            ClientType::Migrator => "migrator",
            ClientType::CreateDb => "createdb",
        }
    }

    /// Ordinary clients allowed to issue writes.
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            ClientType::Default
                | ClientType::Shell
                | ClientType::ReadWriteBroker
                | ClientType::ReadWriteBrokerReplicaOnly
                | ClientType::Migrator
        )
    }

    /// Ordinary (non-admin, non-replication) client types.
    pub fn is_normal(self) -> bool {
        matches!(
            self,
            ClientType::Default
                | ClientType::Shell
                | ClientType::ReadOnlyShell
                | ClientType::ReadWriteBroker
                | ClientType::ReadOnlyBroker
                | ClientType::ReadWriteBrokerReplicaOnly
                | ClientType::ReadOnlyBrokerReplicaOnly
                | ClientType::Migrator
        )
    }

    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            ClientType::ReadOnlyShell
                | ClientType::ReadOnlyBroker
                | ClientType::SlaveOnlyBroker
                | ClientType::ReadOnlyAdminUtility
                | ClientType::ReadOnlyBrokerReplicaOnly
                | ClientType::SlaveOnlyBrokerReplicaOnly
        )
    }

    pub fn is_admin(self) -> bool {
        matches!(
            self,
            ClientType::ReadWriteAdminUtility
                | ClientType::ReadOnlyAdminUtility
                | ClientType::AdminShell
                | ClientType::AdminShellWriteOnSlave
        )
    }

    /// Clients that only ever talk to replicas.
    pub fn is_replica_only(self) -> bool {
        matches!(
            self,
            ClientType::ReadWriteBrokerReplicaOnly
                | ClientType::ReadOnlyBrokerReplicaOnly
                | ClientType::SlaveOnlyBrokerReplicaOnly
        )
    }

    /// Clients permitted to write on a standby host.
    pub fn writes_on_standby(self) -> bool {
        matches!(
            self,
            ClientType::ReplicationBroker
                | ClientType::ReadWriteBrokerReplicaOnly
                | ClientType::AdminShellWriteOnSlave
        )
    }

    /// Log shipping and replication plumbing.
    pub fn is_log_replicator(self) -> bool {
        matches!(self, ClientType::LogCopier | ClientType::ReplicationBroker)
    }
}

/// Credential bundle presented at session boot.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientCredential {
    pub client_type: ClientType,
    pub client_info: String,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
    pub program_name: String,
    pub login_name: String,
    pub host_name: String,
    /// Colon-separated host list tried before the default order
    pub preferred_hosts: String,
    pub connect_order_random: bool,
    pub process_id: u32,
}

impl ClientCredential {
    pub fn has_preferred_hosts(&self) -> bool {
        !self.preferred_hosts.is_empty()
    }

    /// Preferred hosts in priority order.
    pub fn preferred_host_list(&self) -> Vec<&str> {
        self.preferred_hosts
            .split(':')
            .filter(|h| !h.is_empty())
            .collect()
    }
}
