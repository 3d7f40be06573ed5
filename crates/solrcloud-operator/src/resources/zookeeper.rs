use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, SecretKeySelector};

use crate::crds::cloud::{SolrCloud, SolrCloudStatus, ZookeeperAcl, ZookeeperConnectionStatus};

/// Marker appended to SOLR_OPTS; the startup script does not read the variable on its own.
pub const ZK_CREDS_AND_ACLS_OPT: &str = "$(SOLR_ZK_CREDS_AND_ACLS)";

/// Idempotent: only creates the chroot when listing it fails.
pub const ENSURE_CHROOT_CMD: &str =
    "solr zk ls ${ZK_CHROOT} -z ${ZK_SERVER} || solr zk mkroot ${ZK_CHROOT} -z ${ZK_SERVER}";

/// Connection details resolved from the observed coordination status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZkConnection {
    /// Servers plus chroot, as handed to the search nodes
    pub connection_string: String,
    pub server: String,
    pub chroot: String,
}

impl ZkConnection {
    pub fn from_status(status: &SolrCloudStatus) -> Self {
        let info = status.zookeeper_connection_info.clone().unwrap_or_default();
        let server = info.internal_connection_string.trim().to_string();
        let mut chroot = info
            .chroot
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or("/")
            .to_string();
        if !chroot.starts_with('/') {
            chroot.insert(0, '/');
        }
        let connection_string = if chroot.len() > 1 {
            format!("{}{}", server, chroot)
        } else {
            server.clone()
        };
        Self {
            connection_string,
            server,
            chroot,
        }
    }

    /// Whether the chroot is anything other than the root node
    pub fn has_chroot(&self) -> bool {
        self.chroot.len() > 1
    }
}

/// Environment and SOLR_OPTS contribution needed to reach the coordination service
#[derive(Debug, Clone, PartialEq)]
pub struct ZkEnvironment {
    pub connection: ZkConnection,
    pub env: Vec<EnvVar>,
    /// Extra option to append to SOLR_OPTS, if any
    pub solr_opt: Option<&'static str>,
}

impl ZkEnvironment {
    /// Post-start command creating the chroot, when one is needed
    pub fn ensure_chroot_command(&self) -> Option<Vec<String>> {
        self.connection
            .has_chroot()
            .then(|| vec!["sh".into(), "-c".into(), ENSURE_CHROOT_CMD.into()])
    }
}

/// Connection an explicitly configured ensemble implies. Provided ensembles
/// publish theirs through the cooperating zookeeper controller instead.
pub fn declared_connection(cloud: &SolrCloud) -> Option<ZookeeperConnectionStatus> {
    let info = cloud.spec.zookeeper_ref.as_ref()?.connection_info.as_ref()?;
    Some(ZookeeperConnectionStatus {
        internal_connection_string: info.internal_connection_string.clone(),
        external_connection_string: info.external_connection_string.clone(),
        chroot: info.chroot.clone(),
    })
}

pub fn resolve(cloud: &SolrCloud, status: &SolrCloudStatus) -> ZkEnvironment {
    let connection = ZkConnection::from_status(status);
    let mut env = vec![
        plain_env("ZK_HOST", &connection.connection_string),
        plain_env("ZK_CHROOT", &connection.chroot),
        plain_env("ZK_SERVER", &connection.server),
    ];

    let (all, read_only) = cloud
        .spec
        .zookeeper_ref
        .as_ref()
        .map(|r| r.acls())
        .unwrap_or((None, None));
    let solr_opt = match all {
        Some(all) => {
            env.extend(acl_env(all, read_only));
            Some(ZK_CREDS_AND_ACLS_OPT)
        }
        None => None,
    };

    ZkEnvironment {
        connection,
        env,
        solr_opt,
    }
}

fn acl_env(all: &ZookeeperAcl, read_only: Option<&ZookeeperAcl>) -> Vec<EnvVar> {
    let mut env = vec![
        secret_env("ZK_ALL_ACL_USERNAME", &all.secret, &all.username_key),
        secret_env("ZK_ALL_ACL_PASSWORD", &all.secret, &all.password_key),
    ];
    let mut opts = String::from(
        "-DzkACLProvider=org.apache.solr.common.cloud.VMParamsAllAndReadonlyDigestZkACLProvider \
         -DzkCredentialsProvider=org.apache.solr.common.cloud.VMParamsSingleSetCredentialsDigestZkCredentialsProvider \
         -DzkDigestUsername=$(ZK_ALL_ACL_USERNAME) -DzkDigestPassword=$(ZK_ALL_ACL_PASSWORD)",
    );
    if let Some(ro) = read_only {
        env.push(secret_env("ZK_READ_ACL_USERNAME", &ro.secret, &ro.username_key));
        env.push(secret_env("ZK_READ_ACL_PASSWORD", &ro.secret, &ro.password_key));
        opts.push_str(
            " -DzkDigestReadonlyUsername=$(ZK_READ_ACL_USERNAME) -DzkDigestReadonlyPassword=$(ZK_READ_ACL_PASSWORD)",
        );
    }
    env.push(plain_env("SOLR_ZK_CREDS_AND_ACLS", &opts));
    env
}

pub(crate) fn plain_env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        ..Default::default()
    }
}

pub(crate) fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.into(),
                key: key.into(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests_zookeeper {
    use super::*;
    use crate::crds::cloud::SolrCloudSpec;

    fn status(server: &str, chroot: Option<&str>) -> SolrCloudStatus {
        SolrCloudStatus {
            zookeeper_connection_info: Some(ZookeeperConnectionStatus {
                internal_connection_string: server.into(),
                external_connection_string: None,
                chroot: chroot.map(String::from),
            }),
            ..Default::default()
        }
    }

    fn cloud(spec: serde_json::Value) -> SolrCloud {
        SolrCloud::new("zk", serde_json::from_value::<SolrCloudSpec>(spec).unwrap())
    }

    fn value<'a>(env: &'a [EnvVar], name: &str) -> Option<&'a str> {
        env.iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.as_deref())
    }

    #[test]
    fn chroot_is_trimmed_and_appended() {
        let zk = resolve(
            &cloud(serde_json::json!({})),
            &status("zk-0:2181,zk-1:2181", Some("  /solr/prod ")),
        );
        assert_eq!(value(&zk.env, "ZK_HOST"), Some("zk-0:2181,zk-1:2181/solr/prod"));
        assert_eq!(value(&zk.env, "ZK_CHROOT"), Some("/solr/prod"));
        assert_eq!(value(&zk.env, "ZK_SERVER"), Some("zk-0:2181,zk-1:2181"));
        let cmd = zk.ensure_chroot_command().unwrap();
        assert_eq!(cmd[2], ENSURE_CHROOT_CMD);
        assert!(zk.solr_opt.is_none());
    }

    #[test]
    fn root_chroot_needs_no_setup() {
        let zk = resolve(&cloud(serde_json::json!({})), &status("zk:2181", Some("/")));
        assert!(!zk.connection.has_chroot());
        assert!(zk.ensure_chroot_command().is_none());
        assert_eq!(value(&zk.env, "ZK_HOST"), Some("zk:2181"));

        let missing = resolve(&cloud(serde_json::json!({})), &status("zk:2181", None));
        assert_eq!(missing.connection.chroot, "/");
    }

    #[test]
    fn acls_add_env_and_solr_opt_marker() {
        let c = cloud(serde_json::json!({"zookeeperRef": {"connectionInfo": {
            "internalConnectionString": "zk:2181",
            "acl": {"secret": "zk-acl", "usernameKey": "user", "passwordKey": "pass"},
            "readOnlyAcl": {"secret": "zk-ro", "usernameKey": "user", "passwordKey": "pass"}
        }}}));
        let zk = resolve(&c, &status("zk:2181", Some("/a")));
        assert_eq!(zk.solr_opt, Some(ZK_CREDS_AND_ACLS_OPT));
        let names: Vec<_> = zk.env.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"ZK_ALL_ACL_PASSWORD"));
        assert!(names.contains(&"ZK_READ_ACL_USERNAME"));
        let creds = value(&zk.env, "SOLR_ZK_CREDS_AND_ACLS").unwrap();
        assert!(creds.contains("-DzkDigestReadonlyPassword=$(ZK_READ_ACL_PASSWORD)"));
        let user = zk.env.iter().find(|e| e.name == "ZK_ALL_ACL_USERNAME").unwrap();
        let selector = user.value_from.as_ref().unwrap().secret_key_ref.as_ref().unwrap();
        assert_eq!(selector.name, "zk-acl");
    }

    #[test]
    fn declared_connection_only_for_explicit_ensembles() {
        let explicit = cloud(serde_json::json!({"zookeeperRef": {"connectionInfo": {
            "internalConnectionString": "zk:2181", "chroot": "/x"
        }}}));
        let declared = declared_connection(&explicit).unwrap();
        assert_eq!(declared.internal_connection_string, "zk:2181");
        assert_eq!(declared.chroot.as_deref(), Some("/x"));

        let provided = cloud(serde_json::json!({"zookeeperRef": {"provided": {"chroot": "/x"}}}));
        assert!(declared_connection(&provided).is_none());
    }
}
