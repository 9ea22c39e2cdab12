//! Variable resolution scenarios: same-name resources in different
//! namespaces force the objref to carry a namespace.

mod common;

use common::TestHarness;

const DEV_RESOURCES: &str = r#"apiVersion: apps/v1
kind: StatefulSet
metadata:
  name: elasticsearch
  namespace: dev
spec:
  template:
    spec:
      containers:
        - name: elasticsearch
          env:
            - name: DISCOVERY_SERVICE
              value: "$(elasticsearch-dev-service-name).monitoring.svc.cluster.local"
            - name: DISCOVERY_PROTOCOL
              value: "$(elasticsearch-dev-protocol)"
---
apiVersion: v1
kind: Service
metadata:
  name: elasticsearch
  namespace: dev
spec:
  ports:
    - name: transport
      port: 9300
      protocol: TCP
  clusterIP: None
"#;

const TEST_RESOURCES: &str = r#"apiVersion: apps/v1
kind: StatefulSet
metadata:
  name: elasticsearch
  namespace: test
spec:
  template:
    spec:
      containers:
        - name: elasticsearch
          env:
            - name: DISCOVERY_SERVICE
              value: "$(elasticsearch-test-service-name).monitoring.svc.cluster.local"
            - name: DISCOVERY_PROTOCOL
              value: "$(elasticsearch-test-protocol)"
---
apiVersion: v1
kind: Service
metadata:
  name: elasticsearch
  namespace: test
spec:
  ports:
    - name: transport
      port: 9300
      protocol: UDP
  clusterIP: None
"#;

fn write_resources(th: &TestHarness, dir: &str) {
    th.write(&format!("{dir}/elasticsearch-dev-service.yaml"), DEV_RESOURCES);
    th.write(&format!("{dir}/elasticsearch-test-service.yaml"), TEST_RESOURCES);
}

#[test]
fn vars_without_namespace_are_ambiguous() {
    let th = TestHarness::new();
    write_resources(&th, "myapp");
    th.write_kustomization(
        "myapp",
        r#"resources:
- elasticsearch-dev-service.yaml
- elasticsearch-test-service.yaml
vars:
- name: elasticsearch-dev-service-name
  objref:
    kind: Service
    name: elasticsearch
    apiVersion: v1
  fieldref:
    fieldpath: metadata.name
- name: elasticsearch-dev-protocol
  objref:
    kind: Service
    name: elasticsearch
    apiVersion: v1
  fieldref:
    fieldpath: spec.ports[0].protocol
"#,
    );
    let err = th.build("myapp").unwrap_err();
    assert!(format!("{err:#}").contains("unable to disambiguate"));
}

#[test]
fn vars_with_namespace_resolve() {
    let th = TestHarness::new();
    write_resources(&th, "myapp");
    th.write_kustomization(
        "myapp",
        r#"resources:
- elasticsearch-dev-service.yaml
- elasticsearch-test-service.yaml
vars:
- name: elasticsearch-test-service-name
  objref:
    kind: Service
    name: elasticsearch
    namespace: test
    apiVersion: v1
  fieldref:
    fieldpath: metadata.name
- name: elasticsearch-test-protocol
  objref:
    kind: Service
    name: elasticsearch
    namespace: test
    apiVersion: v1
  fieldref:
    fieldpath: spec.ports[0].protocol
- name: elasticsearch-dev-service-name
  objref:
    kind: Service
    name: elasticsearch
    namespace: dev
    apiVersion: v1
  fieldref:
    fieldpath: metadata.name
- name: elasticsearch-dev-protocol
  objref:
    kind: Service
    name: elasticsearch
    namespace: dev
    apiVersion: v1
  fieldref:
    fieldpath: spec.ports[0].protocol
"#,
    );
    let out = th.build("myapp").unwrap();
    assert!(out.contains("value: elasticsearch.monitoring.svc.cluster.local"));
    assert!(out.contains("value: TCP"));
    assert!(out.contains("value: UDP"));
    assert!(!out.contains("$(elasticsearch"));
}

#[test]
fn declared_var_with_default_survives_missing_referent() {
    let th = TestHarness::new();
    th.write(
        "app/pod.yaml",
        "apiVersion: v1\nkind: Pod\nmetadata:\n  name: p\nspec:\n  containers:\n  - name: c\n    env:\n    - name: TARGET\n      value: $(MISSING)\n",
    );
    th.write_kustomization(
        "app",
        r#"resources:
- pod.yaml
vars:
- name: MISSING
  objref:
    kind: Service
    name: nowhere
    apiVersion: v1
  default: fallback
"#,
    );
    let out = th.build("app").unwrap();
    assert!(out.contains("value: fallback"));
}
