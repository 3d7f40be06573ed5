//! Basic-auth bootstrap: credentials and the security.json policy document.
//!
//! Credentials are minted once. When the bootstrap secret already exists the
//! persisted secrets are returned untouched, so a recomputation never
//! invalidates passwords clients already hold. A lost basic-auth secret is
//! rebuilt from the admin credential kept in the bootstrap secret.

use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose::STANDARD};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use rand::Rng;
use rand::seq::SliceRandom;
use sha2::{Digest, Sha256};
use tracing::info;

use super::{PersistedSecrets, labels, object_meta};
use crate::crds::cloud::SolrCloud;
use crate::error::GenerateError;

pub const DEFAULT_PROBE_PATH: &str = "/admin/info/system";
pub const SECURITY_JSON_KEY: &str = "security.json";
pub const BASIC_AUTH_TYPE: &str = "kubernetes.io/basic-auth";
pub const USERNAME_KEY: &str = "username";
pub const PASSWORD_KEY: &str = "password";

pub const ADMIN_USER: &str = "admin";
/// Account handed out to clients through the public basic-auth secret
pub const DEFAULT_CLIENT_USER: &str = "k8s-oper";
pub const SYSTEM_USER: &str = "solr";

const PASSWORD_LEN: usize = 16;
const LOWER: &[u8] = b"abcdefghijklmnpqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const PUNCTUATION: &[u8] = b"()[]%#@-()[]%#@-";

/// Basic-auth material for a cluster with security enabled
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityArtifacts {
    /// Name of the secret holding the client username and password
    pub basic_auth_secret_name: String,
    /// Public client credential; `None` when the user supplies their own secret
    pub basic_auth: Option<Secret>,
    /// Admin/system credentials and the policy document
    pub bootstrap: Option<Secret>,
    /// Whether a secret was produced in this pass and still has to be created
    pub generated: bool,
}

/// Resolve the basic-auth secrets for `cloud`, minting credentials only when
/// no bootstrap secret has been persisted yet.
pub fn bootstrap<R: Rng + ?Sized>(
    cloud: &SolrCloud,
    persisted: &PersistedSecrets,
    rng: &mut R,
) -> Result<Option<SecurityArtifacts>, GenerateError> {
    let Some(security) = cloud.spec.solr_security.as_ref() else {
        return Ok(None);
    };
    let basic_auth_secret_name = cloud.basic_auth_secret_name();

    if security.basic_auth_secret.is_some() {
        let secret = persisted
            .user_basic_auth
            .as_ref()
            .ok_or_else(|| GenerateError::BasicAuthSecretNotFound(basic_auth_secret_name.clone()))?;
        validate_basic_auth_secret(secret)?;
        return Ok(Some(SecurityArtifacts {
            basic_auth_secret_name,
            basic_auth: None,
            bootstrap: None,
            generated: false,
        }));
    }

    if let Some(existing) = &persisted.bootstrap {
        let (basic_auth, generated) = match &persisted.basic_auth {
            Some(secret) => (secret.clone(), false),
            None => {
                let admin_password = existing
                    .data
                    .as_ref()
                    .and_then(|d| d.get(ADMIN_USER))
                    .map(|b| String::from_utf8_lossy(&b.0).into_owned())
                    .ok_or_else(|| GenerateError::MissingSecretKey {
                        name: cloud.security_bootstrap_secret_name(),
                        key: ADMIN_USER,
                    })?;
                info!(
                    cloud = %cloud.metadata.name.as_deref().unwrap_or_default(),
                    "rebuilding basic-auth secret from bootstrap credentials"
                );
                let secret = basic_auth_secret(
                    cloud,
                    basic_auth_secret_name.clone(),
                    ADMIN_USER,
                    &admin_password,
                );
                (secret, true)
            }
        };
        return Ok(Some(SecurityArtifacts {
            basic_auth_secret_name,
            basic_auth: Some(basic_auth),
            bootstrap: Some(existing.clone()),
            generated,
        }));
    }

    let mut passwords = BTreeMap::new();
    let mut credentials = BTreeMap::new();
    for user in [ADMIN_USER, DEFAULT_CLIENT_USER, SYSTEM_USER] {
        let password = random_password(rng);
        credentials.insert(user, password_hash(&random_salt(rng), password.as_bytes()));
        passwords.insert(user, password);
    }
    let document = security_json(
        &credentials,
        &probe_paths(cloud),
        security.probes_require_auth,
    );
    let policy = serde_json::to_string_pretty(&document)?;
    info!(cloud = %cloud.metadata.name.as_deref().unwrap_or_default(), "generated bootstrap credentials");

    let (labels, annotations) =
        labels::object_meta_maps(cloud, &[], BTreeMap::new(), None, None);
    let basic_auth = basic_auth_secret(
        cloud,
        basic_auth_secret_name.clone(),
        DEFAULT_CLIENT_USER,
        &passwords[DEFAULT_CLIENT_USER],
    );
    // Consumed once by the setup-zk init container; never read back afterwards.
    let bootstrap = Secret {
        metadata: object_meta(
            cloud,
            cloud.security_bootstrap_secret_name(),
            labels,
            annotations,
        ),
        data: Some(BTreeMap::from([
            (ADMIN_USER.to_string(), bytes(&passwords[ADMIN_USER])),
            (SYSTEM_USER.to_string(), bytes(&passwords[SYSTEM_USER])),
            (SECURITY_JSON_KEY.to_string(), bytes(&policy)),
        ])),
        type_: Some("Opaque".into()),
        ..Default::default()
    };
    Ok(Some(SecurityArtifacts {
        basic_auth_secret_name,
        basic_auth: Some(basic_auth),
        bootstrap: Some(bootstrap),
        generated: true,
    }))
}

fn basic_auth_secret(cloud: &SolrCloud, name: String, user: &str, password: &str) -> Secret {
    let (labels, annotations) =
        labels::object_meta_maps(cloud, &[], BTreeMap::new(), None, None);
    Secret {
        metadata: object_meta(cloud, name, labels, annotations),
        data: Some(BTreeMap::from([
            (USERNAME_KEY.to_string(), bytes(user)),
            (PASSWORD_KEY.to_string(), bytes(password)),
        ])),
        type_: Some(BASIC_AUTH_TYPE.into()),
        ..Default::default()
    }
}

fn bytes(s: &str) -> ByteString {
    ByteString(s.as_bytes().to_vec())
}

/// 16 characters: a lowercase first, an uppercase last, and the interior taken
/// from a fresh permutation of the full alphabet.
pub fn random_password<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut alphabet: Vec<u8> = [LOWER, UPPER, DIGITS, PUNCTUATION].concat();
    alphabet.shuffle(rng);
    let mut pass = Vec::with_capacity(PASSWORD_LEN);
    pass.push(LOWER[rng.random_range(0..LOWER.len())]);
    pass.extend_from_slice(&alphabet[1..PASSWORD_LEN - 1]);
    pass.push(UPPER[rng.random_range(0..UPPER.len())]);
    pass.into_iter().map(char::from).collect()
}

/// SHA-256 of 32 random bytes
pub fn random_salt<R: Rng + ?Sized>(rng: &mut R) -> [u8; 32] {
    let mut raw = [0u8; 32];
    rng.fill(&mut raw[..]);
    Sha256::digest(raw).into()
}

/// `base64(sha256(sha256(salt ++ password))) + " " + base64(salt)`, the
/// format the basic-auth plugin verifies against.
pub fn password_hash(salt: &[u8], password: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password);
    let once = hasher.finalize();
    let twice = Sha256::digest(once);
    format!("{} {}", STANDARD.encode(twice), STANDARD.encode(salt))
}

/// Default probe path followed by user probe paths, first occurrence wins
pub fn probe_paths(cloud: &SolrCloud) -> Vec<String> {
    let custom = cloud
        .spec
        .custom_solr_kube_options
        .pod_options
        .as_ref()
        .map(|p| p.custom_probe_paths())
        .unwrap_or_default();
    let mut paths: Vec<String> = Vec::new();
    for path in std::iter::once(DEFAULT_PROBE_PATH.to_string()).chain(custom) {
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}

fn security_json(
    credentials: &BTreeMap<&str, String>,
    probe_paths: &[String],
    probes_require_auth: bool,
) -> serde_json::Value {
    let probe_role = if probes_require_auth {
        serde_json::json!("k8s")
    } else {
        serde_json::Value::Null
    };
    let mut permissions: Vec<serde_json::Value> = probe_paths
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let path = path.strip_prefix("/solr").unwrap_or(path);
            serde_json::json!({
                "name": format!("k8s-probe-{}", i),
                "role": probe_role,
                "collection": null,
                "path": path,
            })
        })
        .collect();
    permissions.extend([
        serde_json::json!({"name": "k8s-status", "role": "k8s", "collection": null, "path": "/admin/collections"}),
        serde_json::json!({"name": "k8s-metrics", "role": "k8s", "collection": null, "path": "/admin/metrics"}),
        serde_json::json!({"name": "k8s-zk", "role": "k8s", "collection": null, "path": "/admin/zookeeper/status"}),
        serde_json::json!({"name": "k8s-ping", "role": "k8s", "collection": "*", "path": "/admin/ping"}),
        serde_json::json!({"name": "read", "role": ["admin", "users"]}),
        serde_json::json!({"name": "update", "role": ["admin"]}),
        serde_json::json!({"name": "security-read", "role": ["admin"]}),
        serde_json::json!({"name": "security-edit", "role": ["admin"]}),
        serde_json::json!({"name": "all", "role": ["admin"]}),
    ]);

    serde_json::json!({
        "authentication": {
            "blockUnknown": probes_require_auth,
            "class": "solr.BasicAuthPlugin",
            "credentials": credentials,
            "realm": "Solr Basic Auth",
            "forwardCredentials": false,
        },
        "authorization": {
            "class": "solr.RuleBasedAuthorizationPlugin",
            "user-role": {
                ADMIN_USER: ["admin", "k8s"],
                DEFAULT_CLIENT_USER: ["k8s"],
                SYSTEM_USER: ["users", "k8s"],
            },
            "permissions": permissions,
        },
    })
}

/// A user-supplied credential secret must be a basic-auth secret with both keys.
pub fn validate_basic_auth_secret(secret: &Secret) -> Result<(), GenerateError> {
    let name = secret.metadata.name.clone().unwrap_or_default();
    let actual = secret.type_.clone().unwrap_or_default();
    if actual != BASIC_AUTH_TYPE {
        return Err(GenerateError::InvalidSecretType { name, actual });
    }
    let data = secret.data.as_ref();
    for key in [USERNAME_KEY, PASSWORD_KEY] {
        if !data.is_some_and(|d| d.contains_key(key)) {
            return Err(GenerateError::MissingSecretKey { name, key });
        }
    }
    Ok(())
}

/// `Authorization` header value for the credentials in a basic-auth secret
pub fn basic_auth_header(secret: &Secret) -> Option<String> {
    let data = secret.data.as_ref()?;
    let user = String::from_utf8_lossy(&data.get(USERNAME_KEY)?.0).into_owned();
    let pass = String::from_utf8_lossy(&data.get(PASSWORD_KEY)?.0).into_owned();
    Some(format!(
        "Basic {}",
        STANDARD.encode(format!("{}:{}", user, pass))
    ))
}

#[cfg(test)]
mod tests_security {
    use super::*;
    use crate::crds::cloud::SolrCloudSpec;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn cloud(spec: serde_json::Value) -> SolrCloud {
        let mut c = SolrCloud::new("sec", serde_json::from_value::<SolrCloudSpec>(spec).unwrap());
        c.metadata.namespace = Some("ns".into());
        c
    }

    fn policy(secret: &Secret) -> serde_json::Value {
        serde_json::from_slice(&secret.data.as_ref().unwrap()[SECURITY_JSON_KEY].0).unwrap()
    }

    #[test]
    fn passwords_have_expected_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let p = random_password(&mut rng);
            assert_eq!(p.len(), 16);
            let first = p.as_bytes()[0];
            let last = p.as_bytes()[15];
            assert!(LOWER.contains(&first));
            assert!(UPPER.contains(&last));
            assert!(!p.contains('o'));
        }
        assert_ne!(random_password(&mut rng), random_password(&mut rng));
    }

    #[test]
    fn hash_matches_independent_recomputation() {
        let salt = [3u8; 32];
        let encoded = password_hash(&salt, b"s3cret");
        let mut inner = salt.to_vec();
        inner.extend_from_slice(b"s3cret");
        let expected = STANDARD.encode(Sha256::digest(Sha256::digest(&inner)));
        assert_eq!(encoded, format!("{} {}", expected, STANDARD.encode(salt)));
    }

    #[test]
    fn no_security_no_artifacts() {
        let mut rng = StdRng::seed_from_u64(1);
        let out = bootstrap(&cloud(serde_json::json!({})), &PersistedSecrets::default(), &mut rng);
        assert!(out.unwrap().is_none());
    }

    #[test]
    fn fresh_bootstrap_creates_both_secrets() {
        let mut rng = StdRng::seed_from_u64(1);
        let c = cloud(serde_json::json!({"solrSecurity": {"probesRequireAuth": true}}));
        let out = bootstrap(&c, &PersistedSecrets::default(), &mut rng).unwrap().unwrap();
        assert!(out.generated);
        let basic = out.basic_auth.unwrap();
        assert_eq!(basic.type_.as_deref(), Some(BASIC_AUTH_TYPE));
        assert_eq!(basic.data.as_ref().unwrap()[USERNAME_KEY].0, b"k8s-oper");
        let boot = out.bootstrap.unwrap();
        let keys: Vec<_> = boot.data.as_ref().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["admin", "security.json", "solr"]);
        let doc = policy(&boot);
        assert_eq!(doc["authentication"]["blockUnknown"], true);
        assert_eq!(doc["authorization"]["permissions"][0]["role"], "k8s");
        assert_eq!(
            doc["authorization"]["permissions"][0]["path"],
            "/admin/info/system"
        );
        assert_eq!(
            doc["authorization"]["user-role"]["k8s-oper"],
            serde_json::json!(["k8s"])
        );
    }

    #[test]
    fn stored_credential_verifies_against_password() {
        let mut rng = StdRng::seed_from_u64(99);
        let c = cloud(serde_json::json!({"solrSecurity": {}}));
        let out = bootstrap(&c, &PersistedSecrets::default(), &mut rng).unwrap().unwrap();
        let basic = out.basic_auth.unwrap();
        let password = basic.data.unwrap()[PASSWORD_KEY].0.clone();
        let doc = policy(&out.bootstrap.unwrap());
        let stored = doc["authentication"]["credentials"]["k8s-oper"].as_str().unwrap();
        let (_, salt_b64) = stored.split_once(' ').unwrap();
        let salt = STANDARD.decode(salt_b64).unwrap();
        assert_eq!(password_hash(&salt, &password), stored);
    }

    #[test]
    fn existing_bootstrap_is_never_regenerated() {
        let c = cloud(serde_json::json!({"solrSecurity": {}}));
        let first = bootstrap(&c, &PersistedSecrets::default(), &mut StdRng::seed_from_u64(1))
            .unwrap()
            .unwrap();
        let persisted = PersistedSecrets {
            basic_auth: first.basic_auth.clone(),
            bootstrap: first.bootstrap.clone(),
            user_basic_auth: None,
        };
        let second = bootstrap(&c, &persisted, &mut StdRng::seed_from_u64(2))
            .unwrap()
            .unwrap();
        assert!(!second.generated);
        assert_eq!(second.bootstrap, first.bootstrap);
        assert_eq!(second.basic_auth, first.basic_auth);
    }

    #[test]
    fn lost_basic_auth_secret_is_rebuilt_from_admin_credential() {
        let c = cloud(serde_json::json!({"solrSecurity": {}}));
        let first = bootstrap(&c, &PersistedSecrets::default(), &mut StdRng::seed_from_u64(1))
            .unwrap()
            .unwrap();
        let stored = first.bootstrap.clone().unwrap();
        let persisted = PersistedSecrets {
            basic_auth: None,
            bootstrap: Some(stored.clone()),
            user_basic_auth: None,
        };
        let rebuilt = bootstrap(&c, &persisted, &mut StdRng::seed_from_u64(2))
            .unwrap()
            .unwrap();
        assert!(rebuilt.generated);
        assert_eq!(rebuilt.bootstrap, Some(stored.clone()));

        let secret = rebuilt.basic_auth.unwrap();
        assert_eq!(secret.metadata.name.as_deref(), Some("sec-solrcloud-basic-auth"));
        assert_eq!(secret.type_.as_deref(), Some(BASIC_AUTH_TYPE));
        let data = secret.data.unwrap();
        assert_eq!(data[USERNAME_KEY].0, ADMIN_USER.as_bytes());
        assert_eq!(data[PASSWORD_KEY], stored.data.unwrap()[ADMIN_USER]);
    }

    #[test]
    fn bootstrap_without_admin_credential_is_reported() {
        let c = cloud(serde_json::json!({"solrSecurity": {}}));
        let persisted = PersistedSecrets {
            basic_auth: None,
            bootstrap: Some(Secret::default()),
            user_basic_auth: None,
        };
        let err = bootstrap(&c, &persisted, &mut StdRng::seed_from_u64(2)).unwrap_err();
        assert!(matches!(
            err,
            GenerateError::MissingSecretKey { key: ADMIN_USER, .. }
        ));
    }

    #[test]
    fn open_probes_use_null_role_and_dedupe_paths() {
        let c = cloud(serde_json::json!({
            "solrSecurity": {"probesRequireAuth": false},
            "customSolrKubeOptions": {"podOptions": {
                "readinessProbe": {"httpGet": {"path": "/solr/admin/health", "port": 8983}},
                "livenessProbe": {"httpGet": {"path": "/admin/info/system", "port": 8983}}
            }}
        }));
        assert_eq!(
            probe_paths(&c),
            vec!["/admin/info/system", "/solr/admin/health"]
        );
        let out = bootstrap(&c, &PersistedSecrets::default(), &mut StdRng::seed_from_u64(3))
            .unwrap()
            .unwrap();
        let doc = policy(&out.bootstrap.unwrap());
        let perms = doc["authorization"]["permissions"].as_array().unwrap();
        assert!(perms[0]["role"].is_null());
        assert_eq!(perms[1]["path"], "/admin/health");
        assert_eq!(perms[2]["name"], "k8s-status");
        assert_eq!(doc["authentication"]["blockUnknown"], false);
    }

    #[test]
    fn user_secret_is_validated() {
        let c = cloud(serde_json::json!({"solrSecurity": {"basicAuthSecret": "mine"}}));
        let mut rng = StdRng::seed_from_u64(1);

        let missing = bootstrap(&c, &PersistedSecrets::default(), &mut rng).unwrap_err();
        assert!(matches!(missing, GenerateError::BasicAuthSecretNotFound(ref n) if n == "mine"));

        let mut secret = Secret {
            metadata: kube::core::ObjectMeta {
                name: Some("mine".into()),
                ..Default::default()
            },
            type_: Some("Opaque".into()),
            ..Default::default()
        };
        let persisted = |s: &Secret| PersistedSecrets {
            user_basic_auth: Some(s.clone()),
            ..Default::default()
        };
        let err = bootstrap(&c, &persisted(&secret), &mut rng).unwrap_err();
        assert!(matches!(err, GenerateError::InvalidSecretType { .. }));

        secret.type_ = Some(BASIC_AUTH_TYPE.into());
        secret.data = Some(BTreeMap::from([(USERNAME_KEY.to_string(), bytes("u"))]));
        let err = bootstrap(&c, &persisted(&secret), &mut rng).unwrap_err();
        assert!(matches!(err, GenerateError::MissingSecretKey { key: PASSWORD_KEY, .. }));

        secret
            .data
            .as_mut()
            .unwrap()
            .insert(PASSWORD_KEY.to_string(), bytes("p"));
        let ok = bootstrap(&c, &persisted(&secret), &mut rng).unwrap().unwrap();
        assert_eq!(ok.basic_auth_secret_name, "mine");
        assert!(ok.basic_auth.is_none() && ok.bootstrap.is_none());
        assert_eq!(basic_auth_header(&secret).as_deref(), Some("Basic dTpw"));
    }
}
