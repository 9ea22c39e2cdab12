//! Sort resources into the legacy emit order: cluster-wide foundations
//! with no dependencies first, heavily depended-upon configuration next,
//! webhooks last.

use crate::resmap::ResourceMap;
use crate::transform::Transformer;
use anyhow::Result;

#[derive(Debug)]
pub struct LegacyOrderTransformer;

impl Transformer for LegacyOrderTransformer {
    fn transform(&self, m: &mut ResourceMap) -> Result<()> {
        let mut resources = m.take_all();
        resources.sort_by(|a, b| {
            a.cur_id()
                .gvk
                .legacy_cmp(&b.cur_id().gvk)
                .then_with(|| a.cur_id().to_string().cmp(&b.cur_id().to_string()))
        });
        m.replace_all(resources);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;

    #[test]
    fn kinds_sort_into_legacy_order() {
        let kinds = [
            "Service",
            "Role",
            "ValidatingWebhookConfiguration",
            "LimitRange",
            "Deployment",
            "Namespace",
            "Secret",
            "Ingress",
            "ConfigMap",
        ];
        let mut m = ResourceMap::new();
        for kind in kinds {
            let yaml = format!("kind: {kind}\nmetadata:\n  name: x\n");
            m.append(Resource::parse_all(yaml.as_bytes()).unwrap().remove(0))
                .unwrap();
        }
        LegacyOrderTransformer.transform(&mut m).unwrap();
        let sorted: Vec<String> = m.iter().map(|r| r.gvk().kind.clone()).collect();
        assert_eq!(
            sorted,
            vec![
                "Namespace",
                "Role",
                "ConfigMap",
                "Secret",
                "Service",
                "LimitRange",
                "Deployment",
                "Ingress",
                "ValidatingWebhookConfiguration",
            ]
        );
    }

    #[test]
    fn ties_break_by_name() {
        let mut m = ResourceMap::new();
        for name in ["zeta", "alpha"] {
            let yaml = format!("kind: ConfigMap\nmetadata:\n  name: {name}\n");
            m.append(Resource::parse_all(yaml.as_bytes()).unwrap().remove(0))
                .unwrap();
        }
        LegacyOrderTransformer.transform(&mut m).unwrap();
        let names: Vec<&str> = m.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
