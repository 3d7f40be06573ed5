//! Transformations applied to an assembled workload when TLS or
//! authenticated health checks are configured. Each takes the workload by
//! value and returns the transformed copy.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{
    ExecAction, PodSpec, Probe, SecretKeySelector, SecretVolumeSource, Volume, VolumeMount,
};

use super::security::{DEFAULT_PROBE_PATH, PASSWORD_KEY, USERNAME_KEY};
use super::zookeeper::{plain_env, secret_env};
use super::{insert_env_before_opts, main_container_mut, pod_spec_mut};
use crate::crds::cloud::{ClientAuth, MountedTlsDirectory, SolrCloud, TlsOptions};
use crate::error::GenerateError;

pub const KEYSTORE_VOLUME: &str = "keystore";
pub const KEYSTORE_DIR: &str = "/var/solr/tls";
pub const TRUSTSTORE_VOLUME: &str = "truststore";
pub const TRUSTSTORE_DIR: &str = "/var/solr/tls-truststore";
pub const TLS_CERT_HASH_ANNOTATION: &str = "solr.operator.dev/tlsCertHash";

/// Timeout for command probes, which pay for a JVM start on every check
const SECURE_PROBE_TIMEOUT: i32 = 5;

/// Where keystore material comes from, resolved from the TLS options
enum CertSource<'a> {
    Keystore {
        keystore: &'a SecretKeySelector,
        password: Option<&'a SecretKeySelector>,
        truststore: Option<&'a SecretKeySelector>,
        truststore_password: Option<&'a SecretKeySelector>,
    },
    Mounted(&'a MountedTlsDirectory),
}

impl<'a> CertSource<'a> {
    fn of(tls: &'a TlsOptions) -> Option<Self> {
        if let Some(keystore) = &tls.pkcs12_secret {
            Some(Self::Keystore {
                keystore,
                password: tls.key_store_password_secret.as_ref(),
                truststore: tls.trust_store_secret.as_ref(),
                truststore_password: tls.trust_store_password_secret.as_ref(),
            })
        } else {
            tls.mounted_tls_dir.as_ref().map(Self::Mounted)
        }
    }
}

fn secret_volume(name: &str, secret: &str) -> Volume {
    Volume {
        name: name.into(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn read_only_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.into(),
        mount_path: path.into(),
        read_only: Some(true),
        ..Default::default()
    }
}

/// Enable TLS on the search nodes: mount keystore material, export the
/// SSL settings and switch HTTP probes to HTTPS.
pub fn with_tls(
    mut sts: StatefulSet,
    tls: &TlsOptions,
    cert_hash: Option<&str>,
) -> Result<StatefulSet, GenerateError> {
    let source = CertSource::of(tls).ok_or(GenerateError::MissingTlsCertificateSource)?;
    let mut env = vec![plain_env("SOLR_SSL_ENABLED", "true")];
    let mut volumes = Vec::new();
    let mut mounts = Vec::new();
    let mut command = None;

    match source {
        CertSource::Keystore {
            keystore,
            password,
            truststore,
            truststore_password,
        } => {
            volumes.push(secret_volume(KEYSTORE_VOLUME, &keystore.name));
            mounts.push(read_only_mount(KEYSTORE_VOLUME, KEYSTORE_DIR));
            let keystore_path = format!("{}/{}", KEYSTORE_DIR, keystore.key);
            env.push(plain_env("SOLR_SSL_KEY_STORE", &keystore_path));
            if let Some(pw) = password {
                env.push(secret_env("SOLR_SSL_KEY_STORE_PASSWORD", &pw.name, &pw.key));
            }
            match truststore {
                Some(ts) => {
                    volumes.push(secret_volume(TRUSTSTORE_VOLUME, &ts.name));
                    mounts.push(read_only_mount(TRUSTSTORE_VOLUME, TRUSTSTORE_DIR));
                    env.push(plain_env(
                        "SOLR_SSL_TRUST_STORE",
                        &format!("{}/{}", TRUSTSTORE_DIR, ts.key),
                    ));
                }
                None => env.push(plain_env("SOLR_SSL_TRUST_STORE", &keystore_path)),
            }
            if let Some(pw) = truststore_password.or(password) {
                env.push(secret_env("SOLR_SSL_TRUST_STORE_PASSWORD", &pw.name, &pw.key));
            }
        }
        CertSource::Mounted(dir) => {
            env.push(plain_env(
                "SOLR_SSL_KEY_STORE",
                &format!("{}/{}", dir.path, dir.keystore_file),
            ));
            env.push(plain_env(
                "SOLR_SSL_TRUST_STORE",
                &format!(
                    "{}/{}",
                    dir.path,
                    dir.truststore_file.as_deref().unwrap_or(&dir.keystore_file)
                ),
            ));
            // Passwords stay in the mounted files and are exported at startup.
            let truststore_pw = dir
                .truststore_password_file
                .as_deref()
                .unwrap_or(&dir.keystore_password_file);
            command = Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                format!(
                    "export SOLR_SSL_KEY_STORE_PASSWORD=\"$(cat {0}/{1})\"; export SOLR_SSL_TRUST_STORE_PASSWORD=\"$(cat {0}/{2})\"; exec solr-foreground",
                    dir.path, dir.keystore_password_file, truststore_pw
                ),
            ]);
        }
    }

    env.push(plain_env(
        "SOLR_SSL_WANT_CLIENT_AUTH",
        bool_str(tls.client_auth == ClientAuth::Want),
    ));
    env.push(plain_env(
        "SOLR_SSL_NEED_CLIENT_AUTH",
        bool_str(tls.client_auth == ClientAuth::Need),
    ));
    env.push(plain_env(
        "SOLR_SSL_CLIENT_HOSTNAME_VERIFICATION",
        bool_str(tls.verify_client_hostname),
    ));
    env.push(plain_env(
        "SOLR_SSL_CHECK_PEER_NAME",
        bool_str(tls.check_peer_name),
    ));
    if tls.hot_reload {
        env.push(plain_env("SOLR_SSL_RELOAD_ENABLED", "true"));
    }

    if let Some(spec) = sts.spec.as_mut() {
        if tls.restart_on_tls_secret_update
            && let Some(hash) = cert_hash
        {
            spec.template
                .metadata
                .get_or_insert_with(Default::default)
                .annotations
                .get_or_insert_with(Default::default)
                .insert(TLS_CERT_HASH_ANNOTATION.into(), hash.into());
        }
        if let Some(pod) = spec.template.spec.as_mut() {
            pod.volumes.get_or_insert_with(Vec::new).extend(volumes);
            if let Some(container) = main_container_mut(pod) {
                container
                    .volume_mounts
                    .get_or_insert_with(Vec::new)
                    .extend(mounts);
                insert_env_before_opts(container, env);
                if command.is_some() {
                    container.command = command;
                }
                for probe in [
                    &mut container.liveness_probe,
                    &mut container.readiness_probe,
                    &mut container.startup_probe,
                ]
                .into_iter()
                .flatten()
                {
                    if let Some(get) = probe.http_get.as_mut() {
                        get.scheme = Some("HTTPS".into());
                    }
                }
            }
        }
    }
    Ok(sts)
}

fn bool_str(b: bool) -> &'static str {
    if b { "true" } else { "false" }
}

/// Health checks move off plain HTTP GETs whenever the server asks for client
/// certificates at all, or when probe endpoints require authentication.
pub fn needs_secure_probes(cloud: &SolrCloud) -> bool {
    let client_auth_requested = cloud
        .spec
        .solr_tls
        .as_ref()
        .is_some_and(|t| t.client_auth != ClientAuth::None);
    let probes_require_auth = cloud
        .spec
        .solr_security
        .as_ref()
        .is_some_and(|s| s.probes_require_auth);
    client_auth_requested || probes_require_auth
}

/// Replace HTTP probes with a command invoking the admin CLI, reading
/// credentials from the mounted basic-auth secret at check time.
pub fn with_secure_probes(mut sts: StatefulSet, cloud: &SolrCloud) -> StatefulSet {
    if !needs_secure_probes(cloud) {
        return sts;
    }
    let probes_require_auth = cloud
        .spec
        .solr_security
        .as_ref()
        .is_some_and(|s| s.probes_require_auth);

    let mut basic_auth_option = String::new();
    let mut enable_basic_auth = "";
    let mut auth_volume = None;
    if probes_require_auth {
        let secret_name = cloud.basic_auth_secret_name();
        let volume_name = secret_name.replace('.', "-");
        let mount_path = format!("/etc/secrets/{}", volume_name);
        basic_auth_option = format!(
            "-Dbasicauth=$(cat {0}/{1}):$(cat {0}/{2})",
            mount_path, USERNAME_KEY, PASSWORD_KEY
        );
        enable_basic_auth = "-Dsolr.httpclient.builder.factory=org.apache.solr.client.solrj.impl.PreemptiveBasicAuthClientBuilderFactory";
        auth_volume = Some((
            Volume {
                name: volume_name.clone(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret_name),
                    default_mode: Some(0o440),
                    ..Default::default()
                }),
                ..Default::default()
            },
            read_only_mount(&volume_name, &mount_path),
        ));
    }

    let (tls_tool_opts, tls_sys_props) = probe_tls_options(cloud.spec.solr_tls.as_ref());
    let java_tool_options = format!("{} {}", basic_auth_option, tls_tool_opts);
    let port = cloud.spec.solr_addressability.pod_port;
    let raw = format!(
        "JAVA_TOOL_OPTIONS=\"{}\" java {} {} \
         -Dsolr.install.dir=\"/opt/solr\" -Dlog4j.configurationFile=\"/opt/solr/server/resources/log4j2-console.xml\" \
         -classpath \"/opt/solr/server/solr-webapp/webapp/WEB-INF/lib/*:/opt/solr/server/lib/ext/*:/opt/solr/server/lib/*\" \
         org.apache.solr.util.SolrCLI api -get {}://localhost:{}/solr{}",
        java_tool_options.trim(),
        tls_sys_props,
        enable_basic_auth,
        cloud.url_scheme(),
        port,
        DEFAULT_PROBE_PATH
    );
    let probe_command = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    if let Some(pod) = pod_spec_mut(&mut sts) {
        if let Some((volume, mount)) = auth_volume {
            pod.volumes.get_or_insert_with(Vec::new).push(volume);
            if let Some(container) = main_container_mut(pod) {
                container.volume_mounts.get_or_insert_with(Vec::new).push(mount);
            }
        }
        replace_probes(pod, &probe_command);
    }
    sts
}

fn replace_probes(pod: &mut PodSpec, command: &str) {
    let Some(container) = main_container_mut(pod) else {
        return;
    };
    for probe in [&mut container.liveness_probe, &mut container.readiness_probe]
        .into_iter()
        .flatten()
    {
        *probe = Probe {
            exec: Some(ExecAction {
                command: Some(vec!["sh".into(), "-c".into(), command.into()]),
            }),
            http_get: None,
            timeout_seconds: Some(SECURE_PROBE_TIMEOUT),
            ..probe.clone()
        };
    }
}

/// JAVA_TOOL_OPTIONS and system properties the CLI needs to talk TLS
fn probe_tls_options(tls: Option<&TlsOptions>) -> (String, String) {
    let Some(tls) = tls else {
        return (String::new(), String::new());
    };
    let tool_opts = match CertSource::of(tls) {
        Some(CertSource::Mounted(dir)) => format!(
            "-Djavax.net.ssl.keyStorePassword=$(cat {0}/{1}) -Djavax.net.ssl.trustStorePassword=$(cat {0}/{2})",
            dir.path,
            dir.keystore_password_file,
            dir.truststore_password_file
                .as_deref()
                .unwrap_or(&dir.keystore_password_file)
        ),
        _ => "-Djavax.net.ssl.keyStorePassword=$SOLR_SSL_KEY_STORE_PASSWORD -Djavax.net.ssl.trustStorePassword=$SOLR_SSL_TRUST_STORE_PASSWORD".to_string(),
    };
    let mut sys_props = String::from(
        "-Djavax.net.ssl.keyStore=$SOLR_SSL_KEY_STORE -Djavax.net.ssl.trustStore=$SOLR_SSL_TRUST_STORE \
         -Djavax.net.ssl.keyStoreType=PKCS12 -Djavax.net.ssl.trustStoreType=PKCS12",
    );
    if !tls.check_peer_name {
        sys_props.push_str(" -Dsolr.ssl.checkPeerName=false");
    }
    (tool_opts, sys_props)
}
