// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Desired-state builder.
//!
//! Translates a [`Snapshot`] into gateway entities. The translation is a pure
//! function of the snapshot: sources are visited in sorted order and every
//! entity name is derived from the namespace, name and rule position of the
//! object that produced it.
//!
//! # Per-kind translation
//!
//! | Source | Entities |
//! |---|---|
//! | `Ingress` | Upstream + Targets + Service per backend, one Route per (rule, path), SNIs per TLS host |
//! | `TCPIngress` | Upstream + Targets + stream Service per backend, one Route per rule, SNIs per TLS host |
//! | `UDPIngress` | Upstream + Targets + stream Service per backend, one Route per rule |
//! | `GatewayPlugin` | one Plugin per resolved target |
//! | `GatewayConsumer` | one Consumer plus one Credential per credential Secret |
//! | TLS `Secret` | one Certificate, when referenced by an in-class ingress |
//!
//! A source with any unresolved reference produces a [`Problem`] and no entities.

use super::types::{BuildOutput, Derived, Problem, ProblemKind};
use crate::constants::{
    CREDENTIAL_TYPE_KEY, DEFAULT_HTTPS_REDIRECT_STATUS_CODE, DEFAULT_INGRESS_CLASS,
    DEFAULT_LB_ALGORITHM, DEFAULT_SERVICE_RETRIES, DEFAULT_SERVICE_TIMEOUT_MS,
    DEFAULT_TARGET_WEIGHT, SUPPORTED_CREDENTIAL_TYPES, SUPPORTED_HTTP_PROTOCOLS,
    SUPPORTED_LB_ALGORITHMS, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY,
};
use crate::crd::{GatewayConsumer, GatewayPlugin, PluginTargetKind, TCPIngress, UDPIngress};
use crate::gateway::{
    Certificate, Consumer, Credential, Destination, Entity, EntityKey, Plugin, PluginScope, Route,
    Service, Sni, Target, Upstream,
};
use crate::labels::{
    CONNECT_TIMEOUT_ANNOTATION, ENDPOINT_SLICE_SERVICE_NAME_LABEL,
    HTTPS_REDIRECT_STATUS_CODE_ANNOTATION, INGRESS_CLASS_ANNOTATION, LB_ALGORITHM_ANNOTATION,
    PATH_ANNOTATION, PRESERVE_HOST_ANNOTATION, PROTOCOL_ANNOTATION, READ_TIMEOUT_ANNOTATION,
    RETRIES_ANNOTATION, STRIP_PATH_ANNOTATION, WRITE_TIMEOUT_ANNOTATION,
};
use crate::snapshot::{Snapshot, SourceKind, SourceMeta, SourceRef};
use k8s_openapi::api::core::v1::{Secret, Service as KubeService};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::{Ingress, IngressBackend};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Redirect status codes accepted for the HTTPS redirect annotation.
const ALLOWED_REDIRECT_CODES: &[u16] = &[301, 302, 307, 308, 426];

/// Builder settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildOptions {
    /// Only objects of this ingress class are translated.
    pub ingress_class: String,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            ingress_class: DEFAULT_INGRESS_CLASS.to_string(),
        }
    }
}

/// The closed set of translatable source objects.
#[derive(Clone, Copy, Debug)]
pub enum SourceObject<'a> {
    HttpIngress(&'a Ingress),
    TcpIngress(&'a TCPIngress),
    UdpIngress(&'a UDPIngress),
    Plugin(&'a GatewayPlugin),
    Consumer(&'a GatewayConsumer),
    TlsSecret(&'a Secret),
}

impl SourceObject<'_> {
    fn object_meta(&self) -> &ObjectMeta {
        match self {
            SourceObject::HttpIngress(o) => &o.metadata,
            SourceObject::TcpIngress(o) => &o.metadata,
            SourceObject::UdpIngress(o) => &o.metadata,
            SourceObject::Plugin(o) => &o.metadata,
            SourceObject::Consumer(o) => &o.metadata,
            SourceObject::TlsSecret(o) => &o.metadata,
        }
    }

    #[must_use]
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceObject::HttpIngress(_) => SourceKind::Ingress,
            SourceObject::TcpIngress(_) => SourceKind::TcpIngress,
            SourceObject::UdpIngress(_) => SourceKind::UdpIngress,
            SourceObject::Plugin(_) => SourceKind::Plugin,
            SourceObject::Consumer(_) => SourceKind::Consumer,
            SourceObject::TlsSecret(_) => SourceKind::Secret,
        }
    }

    #[must_use]
    pub fn source_ref(&self) -> SourceRef {
        let meta = self.object_meta();
        SourceRef::new(
            self.kind(),
            meta.namespace.clone().unwrap_or_default(),
            meta.name.clone().unwrap_or_default(),
        )
    }

    #[must_use]
    pub fn meta(&self) -> SourceMeta {
        let status = match self {
            SourceObject::TcpIngress(o) => o.status.clone(),
            SourceObject::UdpIngress(o) => o.status.clone(),
            SourceObject::Plugin(o) => o.status.clone(),
            SourceObject::Consumer(o) => o.status.clone(),
            SourceObject::HttpIngress(_) | SourceObject::TlsSecret(_) => None,
        };
        SourceMeta::from_object_meta(self.object_meta(), status)
    }
}

/// Upstream name for a Service port: `{svc}.{ns}.{port}.svc`.
#[must_use]
pub fn upstream_name(namespace: &str, service: &str, port: i32) -> String {
    format!("{service}.{namespace}.{port}.svc")
}

/// Gateway Service name: `{ns}.{svc}.{port}`, suffixed with the stream protocol.
#[must_use]
pub fn service_name(namespace: &str, service: &str, port: i32, stream: Option<&str>) -> String {
    match stream {
        Some(proto) => format!("{namespace}.{service}.{port}.{proto}"),
        None => format!("{namespace}.{service}.{port}"),
    }
}

/// Target name: `{upstream}@{address}:{port}`, IPv6 addresses bracketed.
#[must_use]
pub fn target_address(address: &str, port: i32) -> String {
    if address.contains(':') {
        format!("[{address}]:{port}")
    } else {
        format!("{address}:{port}")
    }
}

/// Certificate name: `{ns}.{secret}`.
#[must_use]
pub fn certificate_name(namespace: &str, secret: &str) -> String {
    format!("{namespace}.{secret}")
}

/// True when `host` is covered by the SNI `sni` (exact or single-label wildcard).
#[must_use]
pub fn sni_matches(sni: &str, host: &str) -> bool {
    if sni == host {
        return true;
    }
    match (sni.strip_prefix("*."), host.split_once('.')) {
        (Some(suffix), Some((label, rest))) => !label.is_empty() && rest == suffix,
        _ => false,
    }
}

fn in_class(meta: &ObjectMeta, class_name: Option<&str>, options: &BuildOptions) -> bool {
    let annotated = meta
        .annotations
        .as_ref()
        .and_then(|a| a.get(INGRESS_CLASS_ANNOTATION))
        .map(String::as_str);
    annotated == Some(options.ingress_class.as_str())
        || (annotated.is_none() && class_name == Some(options.ingress_class.as_str()))
}

/// Backend port as declared by a rule.
#[derive(Clone, Debug)]
enum PortRef {
    Number(i32),
    Name(String),
}

impl std::fmt::Display for PortRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortRef::Number(n) => write!(f, "{n}"),
            PortRef::Name(n) => f.write_str(n),
        }
    }
}

/// Service annotation settings, validated.
#[derive(Clone, Debug)]
struct ServiceTuning {
    protocol: String,
    path: Option<String>,
    retries: u32,
    connect_timeout: u32,
    read_timeout: u32,
    write_timeout: u32,
    algorithm: String,
}

fn annotation<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

fn parse_annotation<T: std::str::FromStr>(
    meta: &ObjectMeta,
    key: &str,
    default: T,
) -> Result<T, String> {
    match annotation(meta, key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("annotation {key}={raw:?} is not valid")),
    }
}

impl ServiceTuning {
    fn from_service(svc: &KubeService) -> Result<Self, String> {
        let meta = &svc.metadata;

        let protocol = annotation(meta, PROTOCOL_ANNOTATION).unwrap_or("http");
        if !SUPPORTED_HTTP_PROTOCOLS.contains(&protocol) {
            return Err(format!(
                "annotation {PROTOCOL_ANNOTATION}={protocol:?} must be one of {SUPPORTED_HTTP_PROTOCOLS:?}"
            ));
        }

        let algorithm = annotation(meta, LB_ALGORITHM_ANNOTATION).unwrap_or(DEFAULT_LB_ALGORITHM);
        if !SUPPORTED_LB_ALGORITHMS.contains(&algorithm) {
            return Err(format!(
                "annotation {LB_ALGORITHM_ANNOTATION}={algorithm:?} must be one of {SUPPORTED_LB_ALGORITHMS:?}"
            ));
        }

        let path = match annotation(meta, PATH_ANNOTATION) {
            Some(p) if !p.starts_with('/') => {
                return Err(format!("annotation {PATH_ANNOTATION}={p:?} must start with '/'"))
            }
            other => other.map(str::to_owned),
        };

        Ok(Self {
            protocol: protocol.to_string(),
            path,
            retries: parse_annotation(meta, RETRIES_ANNOTATION, DEFAULT_SERVICE_RETRIES)?,
            connect_timeout: parse_annotation(
                meta,
                CONNECT_TIMEOUT_ANNOTATION,
                DEFAULT_SERVICE_TIMEOUT_MS,
            )?,
            read_timeout: parse_annotation(meta, READ_TIMEOUT_ANNOTATION, DEFAULT_SERVICE_TIMEOUT_MS)?,
            write_timeout: parse_annotation(
                meta,
                WRITE_TIMEOUT_ANNOTATION,
                DEFAULT_SERVICE_TIMEOUT_MS,
            )?,
            algorithm: algorithm.to_string(),
        })
    }
}

/// Ingress annotation settings, validated.
#[derive(Clone, Copy, Debug)]
struct RouteTuning {
    strip_path: bool,
    preserve_host: bool,
    https_redirect_status_code: u16,
}

impl RouteTuning {
    fn from_meta(meta: &ObjectMeta) -> Result<Self, String> {
        let code = parse_annotation(
            meta,
            HTTPS_REDIRECT_STATUS_CODE_ANNOTATION,
            DEFAULT_HTTPS_REDIRECT_STATUS_CODE,
        )?;
        if !ALLOWED_REDIRECT_CODES.contains(&code) {
            return Err(format!(
                "annotation {HTTPS_REDIRECT_STATUS_CODE_ANNOTATION}={code} must be one of {ALLOWED_REDIRECT_CODES:?}"
            ));
        }
        Ok(Self {
            strip_path: parse_annotation(meta, STRIP_PATH_ANNOTATION, false)?,
            preserve_host: parse_annotation(meta, PRESERVE_HOST_ANNOTATION, true)?,
            https_redirect_status_code: code,
        })
    }
}

fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return String::from_utf8(bytes.0.clone()).ok();
    }
    secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(key))
        .cloned()
}

fn secret_keys(secret: &Secret) -> BTreeSet<String> {
    let mut keys: BTreeSet<String> = secret
        .data
        .as_ref()
        .map(|d| d.keys().cloned().collect())
        .unwrap_or_default();
    if let Some(string_data) = &secret.string_data {
        keys.extend(string_data.keys().cloned());
    }
    keys
}

/// Lookup tables over the reference data of a snapshot.
struct Index<'a> {
    services: BTreeMap<(String, String), &'a KubeService>,
    secrets: BTreeMap<(String, String), &'a Secret>,
    endpoint_slices: BTreeMap<(String, String), Vec<&'a EndpointSlice>>,
}

impl<'a> Index<'a> {
    fn new(snapshot: &'a Snapshot) -> Self {
        let key = |meta: &ObjectMeta| {
            (
                meta.namespace.clone().unwrap_or_default(),
                meta.name.clone().unwrap_or_default(),
            )
        };

        let mut endpoint_slices: BTreeMap<(String, String), Vec<&EndpointSlice>> = BTreeMap::new();
        for slice in &snapshot.endpoint_slices {
            let Some(service) = slice.labels().get(ENDPOINT_SLICE_SERVICE_NAME_LABEL) else {
                continue;
            };
            endpoint_slices
                .entry((slice.namespace().unwrap_or_default(), service.clone()))
                .or_default()
                .push(slice);
        }
        for slices in endpoint_slices.values_mut() {
            slices.sort_by_key(|s| s.name_any());
        }

        Self {
            services: snapshot
                .services
                .iter()
                .map(|s| (key(&s.metadata), s))
                .collect(),
            secrets: snapshot
                .secrets
                .iter()
                .map(|s| (key(&s.metadata), s))
                .collect(),
            endpoint_slices,
        }
    }

    fn secret(&self, namespace: &str, name: &str) -> Option<&'a Secret> {
        self.secrets
            .get(&(namespace.to_string(), name.to_string()))
            .copied()
    }

    fn service(&self, namespace: &str, name: &str) -> Option<&'a KubeService> {
        self.services
            .get(&(namespace.to_string(), name.to_string()))
            .copied()
    }

    /// Validate a TLS secret and return its certificate entity.
    fn certificate(&self, namespace: &str, name: &str) -> Result<Certificate, ProblemKind> {
        let secret = self
            .secret(namespace, name)
            .ok_or_else(|| ProblemKind::MissingReference(format!("Secret {namespace}/{name}")))?;
        let cert = secret_value(secret, TLS_CERT_KEY);
        let key = secret_value(secret, TLS_PRIVATE_KEY_KEY);
        match (cert, key) {
            (Some(cert), Some(key)) if !cert.is_empty() && !key.is_empty() => Ok(Certificate {
                name: certificate_name(namespace, name),
                cert,
                key,
            }),
            _ => Err(ProblemKind::MissingReference(format!(
                "Secret {namespace}/{name} lacks non-empty {TLS_CERT_KEY} and {TLS_PRIVATE_KEY_KEY}"
            ))),
        }
    }

    /// Resolve a backend reference into Upstream, Targets and Service.
    ///
    /// Returns the gateway Service name and the entities.
    fn backend(
        &self,
        namespace: &str,
        service: &str,
        port: &PortRef,
        stream: Option<&str>,
    ) -> Result<(String, Vec<Entity>), ProblemKind> {
        let svc = self
            .service(namespace, service)
            .ok_or_else(|| ProblemKind::MissingReference(format!("Service {namespace}/{service}")))?;
        let spec = svc.spec.as_ref();
        let ports = spec.and_then(|s| s.ports.as_deref()).unwrap_or_default();

        let svc_port = ports
            .iter()
            .find(|p| match port {
                PortRef::Number(n) => p.port == *n,
                PortRef::Name(name) => p.name.as_deref() == Some(name.as_str()),
            })
            .ok_or_else(|| {
                ProblemKind::MissingReference(format!(
                    "Service {namespace}/{service} has no port {port}"
                ))
            })?;

        let tuning = ServiceTuning::from_service(svc).map_err(|e| {
            ProblemKind::InvalidSpec(format!("Service {namespace}/{service}: {e}"))
        })?;

        let upstream = upstream_name(namespace, service, svc_port.port);
        let mut entities = vec![Entity::Upstream(Upstream {
            name: upstream.clone(),
            algorithm: tuning.algorithm.clone(),
        })];

        let external_name = spec
            .filter(|s| s.type_.as_deref() == Some("ExternalName"))
            .and_then(|s| s.external_name.as_deref());

        let mut addresses = BTreeSet::new();
        if let Some(external) = external_name {
            addresses.insert(target_address(external, svc_port.port));
        } else {
            for slice in self
                .endpoint_slices
                .get(&(namespace.to_string(), service.to_string()))
                .into_iter()
                .flatten()
            {
                let Some(endpoint_port) = slice.ports.as_deref().unwrap_or_default().iter().find(
                    |p| p.name.as_deref().unwrap_or("") == svc_port.name.as_deref().unwrap_or(""),
                ) else {
                    continue;
                };
                let Some(port_number) = endpoint_port.port else {
                    continue;
                };
                for endpoint in &slice.endpoints {
                    let ready = endpoint
                        .conditions
                        .as_ref()
                        .and_then(|c| c.ready)
                        .unwrap_or(true);
                    if !ready {
                        continue;
                    }
                    for address in &endpoint.addresses {
                        addresses.insert(target_address(address, port_number));
                    }
                }
            }
        }

        for address in addresses {
            entities.push(Entity::Target(Target {
                name: format!("{upstream}@{address}"),
                upstream: upstream.clone(),
                target: address,
                weight: DEFAULT_TARGET_WEIGHT,
            }));
        }

        let port = u16::try_from(svc_port.port).map_err(|_| {
            ProblemKind::InvalidSpec(format!(
                "Service {namespace}/{service} port {} is out of range",
                svc_port.port
            ))
        })?;
        let name = service_name(namespace, service, svc_port.port, stream);
        let (protocol, path) = match stream {
            Some(proto) => (proto.to_string(), None),
            None => (tuning.protocol, tuning.path),
        };
        entities.push(Entity::Service(Service {
            name: name.clone(),
            protocol,
            host: upstream,
            port,
            path,
            retries: tuning.retries,
            connect_timeout: tuning.connect_timeout,
            read_timeout: tuning.read_timeout,
            write_timeout: tuning.write_timeout,
        }));

        Ok((name, entities))
    }
}

/// Per-source translation output, keyed for stable ordering and deduplication.
type Entities = BTreeMap<EntityKey, Entity>;

fn push_all(into: &mut Entities, entities: impl IntoIterator<Item = Entity>) {
    for entity in entities {
        into.insert(entity.key(), entity);
    }
}

fn listen_port(port: i32) -> Result<u16, ProblemKind> {
    u16::try_from(port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| ProblemKind::InvalidSpec(format!("listen port {port} is out of range")))
}

struct Translator<'a> {
    index: Index<'a>,
    /// Hostnames that end up with an SNI, for HTTP route protocols.
    tls_hosts: BTreeSet<String>,
}

impl Translator<'_> {
    fn has_sni(&self, host: &str) -> bool {
        self.tls_hosts.iter().any(|sni| sni_matches(sni, host))
    }

    fn tls_claims<'t>(
        &self,
        namespace: &str,
        claims: impl Iterator<Item = (&'t [String], &'t str)>,
        out: &mut Entities,
    ) -> Result<(), ProblemKind> {
        for (hosts, secret) in claims {
            let certificate = self.index.certificate(namespace, secret)?;
            for host in hosts {
                push_all(
                    out,
                    [Entity::Sni(Sni {
                        name: host.clone(),
                        certificate: certificate.name.clone(),
                    })],
                );
            }
        }
        Ok(())
    }

    fn http_ingress(&self, ingress: &Ingress) -> Result<Entities, ProblemKind> {
        let namespace = ingress.namespace().unwrap_or_default();
        let name = ingress.name_any();
        let tuning = RouteTuning::from_meta(&ingress.metadata).map_err(ProblemKind::InvalidSpec)?;
        let mut out = Entities::new();

        let Some(spec) = ingress.spec.as_ref() else {
            return Ok(out);
        };

        let tls: Vec<(Vec<String>, String)> = spec
            .tls
            .iter()
            .flatten()
            .filter_map(|t| {
                t.secret_name
                    .clone()
                    .map(|s| (t.hosts.clone().unwrap_or_default(), s))
            })
            .collect();
        self.tls_claims(
            &namespace,
            tls.iter().map(|(h, s)| (h.as_slice(), s.as_str())),
            &mut out,
        )?;

        let route = |route_name: String, service: String, host: Option<&str>, path: String| {
            let hosts: Vec<String> = host.map(str::to_owned).into_iter().collect();
            let https = hosts.iter().any(|h| self.has_sni(h));
            let protocols = if https {
                vec!["http".to_string(), "https".to_string()]
            } else {
                vec!["http".to_string()]
            };
            Entity::Route(Route {
                name: route_name,
                service,
                protocols,
                hosts,
                paths: vec![path],
                snis: Vec::new(),
                destinations: Vec::new(),
                strip_path: tuning.strip_path,
                preserve_host: tuning.preserve_host,
                https_redirect_status_code: tuning.https_redirect_status_code,
            })
        };

        for (i, rule) in spec.rules.iter().flatten().enumerate() {
            let host = rule.host.as_deref().filter(|h| !h.is_empty());
            let Some(http) = rule.http.as_ref() else {
                continue;
            };
            for (j, path) in http.paths.iter().enumerate() {
                let (service, entities) = self.ingress_backend(&namespace, &path.backend)?;
                push_all(&mut out, entities);

                let raw = path.path.clone().filter(|p| !p.is_empty()).unwrap_or_else(|| "/".into());
                if !raw.starts_with('/') {
                    return Err(ProblemKind::InvalidSpec(format!(
                        "rule {i} path {raw:?} must start with '/'"
                    )));
                }
                let path = if path.path_type == "Exact" {
                    format!("~{raw}$")
                } else {
                    raw
                };
                push_all(
                    &mut out,
                    [route(format!("{namespace}.{name}.{i}.{j}"), service, host, path)],
                );
            }
        }

        if let Some(backend) = spec.default_backend.as_ref() {
            let (service, entities) = self.ingress_backend(&namespace, backend)?;
            push_all(&mut out, entities);
            push_all(
                &mut out,
                [route(format!("{namespace}.{name}.default"), service, None, "/".into())],
            );
        }

        Ok(out)
    }

    fn ingress_backend(
        &self,
        namespace: &str,
        backend: &IngressBackend,
    ) -> Result<(String, Vec<Entity>), ProblemKind> {
        let service = backend.service.as_ref().ok_or_else(|| {
            ProblemKind::InvalidSpec("only Service backends are supported".to_string())
        })?;
        let port = match service.port.as_ref() {
            Some(p) => match (p.number, p.name.as_ref()) {
                (Some(n), _) => PortRef::Number(n),
                (None, Some(name)) => PortRef::Name(name.clone()),
                (None, None) => {
                    return Err(ProblemKind::InvalidSpec(format!(
                        "backend {} has no port",
                        service.name
                    )))
                }
            },
            None => {
                return Err(ProblemKind::InvalidSpec(format!(
                    "backend {} has no port",
                    service.name
                )))
            }
        };
        self.index.backend(namespace, &service.name, &port, None)
    }

    fn tcp_ingress(&self, tcp: &TCPIngress) -> Result<Entities, ProblemKind> {
        let namespace = tcp.namespace().unwrap_or_default();
        let name = tcp.name_any();
        let mut out = Entities::new();

        self.tls_claims(
            &namespace,
            tcp.spec
                .tls
                .iter()
                .map(|t| (t.hosts.as_slice(), t.secret_name.as_str())),
            &mut out,
        )?;

        for (i, rule) in tcp.spec.rules.iter().enumerate() {
            let port = listen_port(rule.port)?;
            let (service, entities) = self.index.backend(
                &namespace,
                &rule.backend.service_name,
                &PortRef::Number(rule.backend.service_port),
                Some("tcp"),
            )?;
            push_all(&mut out, entities);

            let host = rule.host.clone().filter(|h| !h.is_empty());
            let (protocols, snis) = match host {
                Some(host) => (vec!["tls".to_string()], vec![host]),
                None => (vec!["tcp".to_string()], Vec::new()),
            };
            push_all(
                &mut out,
                [stream_route(format!("{namespace}.{name}.{i}"), service, protocols, snis, port)],
            );
        }
        Ok(out)
    }

    fn udp_ingress(&self, udp: &UDPIngress) -> Result<Entities, ProblemKind> {
        let namespace = udp.namespace().unwrap_or_default();
        let name = udp.name_any();
        let mut out = Entities::new();

        for (i, rule) in udp.spec.rules.iter().enumerate() {
            let port = listen_port(rule.port)?;
            let (service, entities) = self.index.backend(
                &namespace,
                &rule.backend.service_name,
                &PortRef::Number(rule.backend.service_port),
                Some("udp"),
            )?;
            push_all(&mut out, entities);
            push_all(
                &mut out,
                [stream_route(
                    format!("{namespace}.{name}.udp.{i}"),
                    service,
                    vec!["udp".to_string()],
                    Vec::new(),
                    port,
                )],
            );
        }
        Ok(out)
    }

    fn consumer(&self, consumer: &GatewayConsumer) -> Result<Entities, ProblemKind> {
        let namespace = consumer.namespace().unwrap_or_default();
        let name = consumer.name_any();
        let username = consumer.spec.username.trim();
        if username.is_empty() {
            return Err(ProblemKind::InvalidSpec("username must not be empty".to_string()));
        }

        let consumer_name = format!("{namespace}.{name}");
        let mut out = Entities::new();
        push_all(
            &mut out,
            [Entity::Consumer(Consumer {
                name: consumer_name.clone(),
                username: username.to_string(),
                custom_id: consumer.spec.custom_id.clone(),
            })],
        );

        for secret_name in &consumer.spec.credentials {
            let secret = self.index.secret(&namespace, secret_name).ok_or_else(|| {
                ProblemKind::MissingReference(format!("Secret {namespace}/{secret_name}"))
            })?;
            let credential_type = secret_value(secret, CREDENTIAL_TYPE_KEY)
                .filter(|t| SUPPORTED_CREDENTIAL_TYPES.contains(&t.as_str()))
                .ok_or_else(|| {
                    ProblemKind::MissingReference(format!(
                        "Secret {namespace}/{secret_name} needs {CREDENTIAL_TYPE_KEY} set to one of {SUPPORTED_CREDENTIAL_TYPES:?}"
                    ))
                })?;

            let mut fields = BTreeMap::new();
            for key in secret_keys(secret) {
                if key == CREDENTIAL_TYPE_KEY {
                    continue;
                }
                let value = secret_value(secret, &key).ok_or_else(|| {
                    ProblemKind::InvalidSpec(format!(
                        "Secret {namespace}/{secret_name} key {key} is not UTF-8"
                    ))
                })?;
                fields.insert(key, value);
            }

            push_all(
                &mut out,
                [Entity::Credential(Credential {
                    name: format!("{consumer_name}.{secret_name}"),
                    consumer: consumer_name.clone(),
                    credential_type,
                    fields,
                })],
            );
        }
        Ok(out)
    }

    fn tls_secret(&self, secret: &Secret) -> Result<Entities, ProblemKind> {
        let namespace = secret.namespace().unwrap_or_default();
        let certificate = self
            .index
            .certificate(&namespace, &secret.name_any())
            .map_err(|e| match e {
                ProblemKind::MissingReference(msg) => ProblemKind::InvalidSpec(msg),
                other => other,
            })?;
        let mut out = Entities::new();
        push_all(&mut out, [Entity::Certificate(certificate)]);
        Ok(out)
    }

    /// Plugins attach to entities produced by other sources, so they run last.
    fn plugin(&self, plugin: &GatewayPlugin, derived: &[Derived]) -> Result<Entities, ProblemKind> {
        let namespace = plugin.namespace().unwrap_or_default();
        let name = plugin.name_any();
        let spec = &plugin.spec;
        if spec.plugin.trim().is_empty() {
            return Err(ProblemKind::InvalidSpec("plugin must not be empty".to_string()));
        }

        let target = &spec.target;
        let target_name = match (target.kind, target.name.as_deref()) {
            (PluginTargetKind::Global, _) => None,
            (_, Some(n)) if !n.is_empty() => Some(n),
            (kind, _) => {
                return Err(ProblemKind::InvalidSpec(format!(
                    "target of kind {kind:?} requires a name"
                )))
            }
        };

        let target_source = |kind: SourceKind| {
            SourceRef::new(kind, namespace.clone(), target_name.unwrap_or_default())
        };
        let scopes: BTreeSet<PluginScope> = match target.kind {
            PluginTargetKind::Global => [PluginScope::Global].into(),
            PluginTargetKind::Service => {
                let svc = target_name.unwrap_or_default();
                let prefix = format!("{svc}.{namespace}.");
                derived
                    .iter()
                    .filter_map(|d| match &d.entity {
                        Entity::Service(s) => Some(s),
                        _ => None,
                    })
                    .filter(|s| match target.port {
                        Some(port) => s.host == upstream_name(&namespace, svc, port),
                        None => s.host.starts_with(&prefix),
                    })
                    .map(|s| PluginScope::Service(s.name.clone()))
                    .collect()
            }
            PluginTargetKind::Ingress | PluginTargetKind::TcpIngress | PluginTargetKind::UdpIngress => {
                let kind = match target.kind {
                    PluginTargetKind::Ingress => SourceKind::Ingress,
                    PluginTargetKind::TcpIngress => SourceKind::TcpIngress,
                    _ => SourceKind::UdpIngress,
                };
                entities_from(derived, &target_source(kind))
                    .into_iter()
                    .filter_map(|e| match e {
                        Entity::Route(r) => Some(PluginScope::Route(r.name.clone())),
                        _ => None,
                    })
                    .collect()
            }
            PluginTargetKind::Consumer => entities_from(derived, &target_source(SourceKind::Consumer))
                .into_iter()
                .filter_map(|e| match e {
                    Entity::Consumer(c) => Some(PluginScope::Consumer(c.name.clone())),
                    _ => None,
                })
                .collect(),
        };

        if scopes.is_empty() {
            return Err(ProblemKind::ScopeNotFound(format!(
                "{:?} {}/{}",
                target.kind,
                namespace,
                target_name.unwrap_or_default()
            )));
        }

        let config = spec
            .config
            .clone()
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
        let mut out = Entities::new();
        for scope in scopes {
            let entity_name = match scope.target() {
                Some(key) => format!("{namespace}.{name}.{}", key.name),
                None => format!("{namespace}.{name}"),
            };
            push_all(
                &mut out,
                [Entity::Plugin(Plugin {
                    name: entity_name,
                    plugin: spec.plugin.clone(),
                    config: config.clone(),
                    enabled: !spec.disabled,
                    scope,
                })],
            );
        }
        Ok(out)
    }
}

fn entities_from<'d>(derived: &'d [Derived], source: &SourceRef) -> Vec<&'d Entity> {
    derived
        .iter()
        .filter(|d| d.source == *source)
        .map(|d| &d.entity)
        .collect()
}

fn stream_route(
    name: String,
    service: String,
    protocols: Vec<String>,
    snis: Vec<String>,
    port: u16,
) -> Entity {
    Entity::Route(Route {
        name,
        service,
        protocols,
        hosts: Vec::new(),
        paths: Vec::new(),
        snis,
        destinations: vec![Destination { ip: None, port }],
        strip_path: false,
        preserve_host: true,
        https_redirect_status_code: DEFAULT_HTTPS_REDIRECT_STATUS_CODE,
    })
}

/// Collect the in-class sources of a snapshot, sorted by identity.
fn collect_sources<'a>(snapshot: &'a Snapshot, options: &BuildOptions) -> Vec<SourceObject<'a>> {
    let mut sources: Vec<SourceObject<'a>> = Vec::new();

    sources.extend(
        snapshot
            .ingresses
            .iter()
            .filter(|i| {
                let class = i.spec.as_ref().and_then(|s| s.ingress_class_name.as_deref());
                in_class(&i.metadata, class, options)
            })
            .map(SourceObject::HttpIngress),
    );
    sources.extend(
        snapshot
            .tcp_ingresses
            .iter()
            .filter(|o| in_class(&o.metadata, None, options))
            .map(SourceObject::TcpIngress),
    );
    sources.extend(
        snapshot
            .udp_ingresses
            .iter()
            .filter(|o| in_class(&o.metadata, None, options))
            .map(SourceObject::UdpIngress),
    );
    sources.extend(
        snapshot
            .plugins
            .iter()
            .filter(|o| in_class(&o.metadata, None, options))
            .map(SourceObject::Plugin),
    );
    sources.extend(
        snapshot
            .consumers
            .iter()
            .filter(|o| in_class(&o.metadata, None, options))
            .map(SourceObject::Consumer),
    );

    // TLS secrets are only translated when an in-class ingress refers to them.
    let mut referenced: BTreeSet<(String, String)> = BTreeSet::new();
    for source in &sources {
        match source {
            SourceObject::HttpIngress(i) => {
                let ns = i.namespace().unwrap_or_default();
                for tls in i.spec.as_ref().and_then(|s| s.tls.as_ref()).into_iter().flatten() {
                    if let Some(secret) = &tls.secret_name {
                        referenced.insert((ns.clone(), secret.clone()));
                    }
                }
            }
            SourceObject::TcpIngress(t) => {
                let ns = t.namespace().unwrap_or_default();
                for tls in &t.spec.tls {
                    referenced.insert((ns.clone(), tls.secret_name.clone()));
                }
            }
            _ => {}
        }
    }
    sources.extend(
        snapshot
            .secrets
            .iter()
            .filter(|s| {
                referenced.contains(&(s.namespace().unwrap_or_default(), s.name_any()))
            })
            .map(SourceObject::TlsSecret),
    );

    sources.sort_by_key(|s| s.source_ref());
    sources
}

/// Hostnames claimed by in-class TLS sections whose secret is usable.
fn tls_hosts(index: &Index<'_>, sources: &[SourceObject<'_>]) -> BTreeSet<String> {
    let mut hosts = BTreeSet::new();
    for source in sources {
        let (namespace, claims): (String, Vec<(Vec<String>, String)>) = match source {
            SourceObject::HttpIngress(i) => (
                i.namespace().unwrap_or_default(),
                i.spec
                    .as_ref()
                    .and_then(|s| s.tls.as_ref())
                    .into_iter()
                    .flatten()
                    .filter_map(|t| {
                        t.secret_name
                            .clone()
                            .map(|s| (t.hosts.clone().unwrap_or_default(), s))
                    })
                    .collect(),
            ),
            SourceObject::TcpIngress(t) => (
                t.namespace().unwrap_or_default(),
                t.spec
                    .tls
                    .iter()
                    .map(|t| (t.hosts.clone(), t.secret_name.clone()))
                    .collect(),
            ),
            _ => continue,
        };
        for (claimed, secret) in claims {
            if index.certificate(&namespace, &secret).is_ok() {
                hosts.extend(claimed);
            }
        }
    }
    hosts
}

/// Translate a snapshot into derived entities and per-object problems.
#[must_use]
pub fn build(snapshot: &Snapshot, options: &BuildOptions) -> BuildOutput {
    let index = Index::new(snapshot);
    let sources = collect_sources(snapshot, options);
    let translator = Translator {
        tls_hosts: tls_hosts(&index, &sources),
        index,
    };

    let mut out = BuildOutput::default();
    let (plugins, others): (Vec<&SourceObject<'_>>, Vec<&SourceObject<'_>>) = sources
        .iter()
        .partition(|s| matches!(s, SourceObject::Plugin(_)));

    for source in others.into_iter().chain(plugins) {
        let source_ref = source.source_ref();
        out.sources.insert(source_ref.clone(), source.meta());

        let result = match source {
            SourceObject::HttpIngress(o) => translator.http_ingress(o),
            SourceObject::TcpIngress(o) => translator.tcp_ingress(o),
            SourceObject::UdpIngress(o) => translator.udp_ingress(o),
            SourceObject::Consumer(o) => translator.consumer(o),
            SourceObject::TlsSecret(o) => translator.tls_secret(o),
            SourceObject::Plugin(o) => translator.plugin(o, &out.derived),
        };

        match result {
            Ok(entities) => {
                debug!(source = %source_ref, entities = entities.len(), "Translated source object");
                out.derived.extend(entities.into_values().map(|mut entity| {
                    entity.normalize();
                    Derived {
                        entity,
                        source: source_ref.clone(),
                    }
                }));
            }
            Err(kind) => {
                debug!(source = %source_ref, problem = %kind, "Source object rejected");
                out.problems.push(Problem::new(source_ref, kind));
            }
        }
    }

    out
}

#[cfg(test)]
#[path = "builder_tests.rs"]
mod builder_tests;
