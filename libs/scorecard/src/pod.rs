//! Kubernetes resource builders for test pods.
//!
//! A test pod has three parts:
//! - an init container that untars the bundle ConfigMap into an emptyDir,
//! - the test container, with the untarred bundle mounted at [`POD_BUNDLE_ROOT`],
//! - optionally a storage sidecar sharing an emptyDir with the test container
//!   so artifacts can be pulled out after the test finishes.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMap, ConfigMapVolumeSource, Container, EmptyDirVolumeSource, EnvVar,
    EnvVarSource, ObjectFieldSelector, Pod, PodSecurityContext, PodSpec, SeccompProfile,
    SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;

use crate::api::TestConfiguration;
use crate::pod_runner::{PodRunnerOptions, PodSecurity};

/// Directory holding the untarred bundle inside the test container.
pub const POD_BUNDLE_ROOT: &str = "/bundle";

pub const TEST_CONTAINER: &str = "scorecard-test";
pub const UNTAR_CONTAINER: &str = "scorecard-untar";
pub const STORAGE_SIDECAR_CONTAINER: &str = "scorecard-gather";

const BUNDLE_VOLUME: &str = "scorecard-bundle";
const UNTAR_VOLUME: &str = "scorecard-untar";
const STORAGE_VOLUME: &str = "scorecard-storage";

/// ConfigMap key holding the bundle archive.
pub const BUNDLE_ARCHIVE_KEY: &str = "bundle.tar.gz";

const BUNDLE_MOUNT: &str = "/scorecard";
const UNTAR_MOUNT: &str = "/scorecard-bundle";

/// Environment variable carrying the pod's namespace.
pub const NAMESPACE_ENV: &str = "SCORECARD_NAMESPACE";

pub const APP_LABEL: &str = "app";
pub const APP_LABEL_VALUE: &str = "scorecard-test";

/// Label tying every pod of a run to its bundle ConfigMap.
pub const TEST_RUN_LABEL: &str = "testrun";

const PULL_IF_NOT_PRESENT: &str = "IfNotPresent";

/// Random lowercase suffix for generated resource names.
pub fn random_suffix(len: usize) -> String {
    uuid::Uuid::new_v4().simple().to_string().chars().take(len).collect()
}

/// Label selector matching every pod created for a bundle ConfigMap.
pub fn test_run_selector(config_map_name: &str) -> String {
    format!("{TEST_RUN_LABEL}={config_map_name}")
}

/// ConfigMap holding the bundle archive.
pub fn bundle_config_map(namespace: &str, bundle_archive: Vec<u8>) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(format!("scorecard-test-{}", random_suffix(4))),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                APP_LABEL.to_string(),
                APP_LABEL_VALUE.to_string(),
            )])),
            ..Default::default()
        },
        binary_data: Some(BTreeMap::from([(
            BUNDLE_ARCHIVE_KEY.to_string(),
            ByteString(bundle_archive),
        )])),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(read_only),
        ..Default::default()
    }
}

/// Pod running one test against the bundle stored in `config_map_name`.
pub fn pod_definition(
    config_map_name: &str,
    test: &TestConfiguration,
    options: &PodRunnerOptions,
) -> Pod {
    let test_container = Container {
        name: TEST_CONTAINER.to_string(),
        image: Some(test.image.clone()),
        image_pull_policy: Some(PULL_IF_NOT_PRESENT.to_string()),
        command: (!test.entrypoint.is_empty()).then(|| test.entrypoint.clone()),
        volume_mounts: Some(vec![mount(UNTAR_VOLUME, POD_BUNDLE_ROOT, true)]),
        env: Some(vec![EnvVar {
            name: NAMESPACE_ENV.to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.namespace".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let untar_container = Container {
        name: UNTAR_CONTAINER.to_string(),
        image: Some(options.untar_image.clone()),
        image_pull_policy: Some(PULL_IF_NOT_PRESENT.to_string()),
        args: Some(vec![
            "tar".to_string(),
            "xvzf".to_string(),
            format!("{BUNDLE_MOUNT}/{BUNDLE_ARCHIVE_KEY}"),
            "-C".to_string(),
            UNTAR_MOUNT.to_string(),
        ]),
        volume_mounts: Some(vec![
            mount(BUNDLE_VOLUME, BUNDLE_MOUNT, true),
            mount(UNTAR_VOLUME, UNTAR_MOUNT, false),
        ]),
        ..Default::default()
    };

    let mut pod = Pod {
        metadata: ObjectMeta {
            name: Some(format!("scorecard-test-{}", random_suffix(4))),
            namespace: Some(options.namespace.clone()),
            labels: Some(BTreeMap::from([
                (APP_LABEL.to_string(), APP_LABEL_VALUE.to_string()),
                (TEST_RUN_LABEL.to_string(), config_map_name.to_string()),
            ])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            service_account_name: (!options.service_account.is_empty())
                .then(|| options.service_account.clone()),
            restart_policy: Some("Never".to_string()),
            containers: vec![test_container],
            init_containers: Some(vec![untar_container]),
            volumes: Some(vec![
                Volume {
                    name: BUNDLE_VOLUME.to_string(),
                    config_map: Some(ConfigMapVolumeSource {
                        name: config_map_name.to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                Volume {
                    name: UNTAR_VOLUME.to_string(),
                    empty_dir: Some(EmptyDirVolumeSource::default()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    };

    if let Some(mount_path) = test.storage_mount_path() {
        add_storage(&mut pod, mount_path, &options.storage_image);
    }
    if options.pod_security == PodSecurity::Restricted {
        apply_restricted_security(&mut pod);
    }

    pod
}

/// Add the artifact volume and the idle sidecar that serves it.
///
/// The test container gets the volume read-write; the sidecar read-only.
pub fn add_storage(pod: &mut Pod, mount_path: &str, storage_image: &str) {
    let Some(spec) = pod.spec.as_mut() else {
        return;
    };

    spec.volumes.get_or_insert_with(Vec::new).push(Volume {
        name: STORAGE_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    });

    if let Some(test_container) = spec.containers.first_mut() {
        test_container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(mount(STORAGE_VOLUME, mount_path, false));
    }

    spec.containers.push(Container {
        name: STORAGE_SIDECAR_CONTAINER.to_string(),
        image: Some(storage_image.to_string()),
        image_pull_policy: Some(PULL_IF_NOT_PRESENT.to_string()),
        args: Some(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "sleep 1000".to_string(),
        ]),
        volume_mounts: Some(vec![mount(STORAGE_VOLUME, mount_path, true)]),
        ..Default::default()
    });
}

/// Harden the pod to satisfy the `restricted` Pod Security Standard.
pub fn apply_restricted_security(pod: &mut Pod) {
    let Some(spec) = pod.spec.as_mut() else {
        return;
    };

    spec.security_context = Some(PodSecurityContext {
        run_as_non_root: Some(true),
        seccomp_profile: Some(SeccompProfile {
            type_: "RuntimeDefault".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    });

    let containers = spec
        .containers
        .iter_mut()
        .chain(spec.init_containers.iter_mut().flatten());
    for container in containers {
        container.security_context = Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
}

/// Whether the test in `pod` has finished.
///
/// A storage sidecar keeps the pod running after the test exits, so a
/// terminated test container also counts as complete.
pub fn is_pod_complete(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };

    if matches!(status.phase.as_deref(), Some("Succeeded") | Some("Failed")) {
        return true;
    }

    status
        .container_statuses
        .iter()
        .flatten()
        .filter(|cs| cs.name == TEST_CONTAINER)
        .any(|cs| cs.state.as_ref().is_some_and(|s| s.terminated.is_some()))
}
