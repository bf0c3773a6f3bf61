//! In-memory OCI for tests and dry runs

use super::models::{
    AvailabilityDomain, Image, Instance, InstanceShapeConfig, LaunchInstanceDetails,
    NetworkSecurityGroup, Page, Shape, Subnet, Vnic, VnicAttachment, LIFECYCLE_TERMINATED,
};
use super::{ComputeApi, NetworkApi};
use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Shapes are served in pages of this size so callers exercise paging.
const SHAPE_PAGE_SIZE: usize = 2;

#[derive(Default)]
struct FakeState {
    availability_domains: Vec<String>,
    shapes: BTreeMap<String, Vec<Shape>>,
    images: HashMap<String, Image>,
    instances: BTreeMap<String, Instance>,
    vnic_attachments: Vec<VnicAttachment>,
    vnics: HashMap<String, Vnic>,
    subnets: BTreeMap<String, Subnet>,
    subnet_available_ips: HashMap<String, u64>,
    nsgs: BTreeMap<String, NetworkSecurityGroup>,
    launch_errors: HashMap<(String, String), ProviderError>,
    launched: Vec<LaunchInstanceDetails>,
    next_id: usize,
}

/// Fake compute and network APIs backed by maps
#[derive(Default)]
pub struct FakeOci {
    state: Mutex<FakeState>,
    list_shapes_calls: AtomicUsize,
}

impl FakeOci {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_availability_domain(&self, name: &str) {
        let mut state = self.state.lock();
        if !state.availability_domains.iter().any(|ad| ad == name) {
            state.availability_domains.push(name.to_string());
        }
    }

    /// Offer `shape` in `availability_domain`.
    pub fn add_shape(&self, availability_domain: &str, shape: Shape) {
        self.add_availability_domain(availability_domain);
        self.state
            .lock()
            .shapes
            .entry(availability_domain.to_string())
            .or_default()
            .push(shape);
    }

    pub fn add_image(&self, image: Image) {
        self.state.lock().images.insert(image.id.clone(), image);
    }

    pub fn add_subnet(&self, subnet: Subnet, available_ips: u64) {
        let mut state = self.state.lock();
        state
            .subnet_available_ips
            .insert(subnet.id.clone(), available_ips);
        state.subnets.insert(subnet.id.clone(), subnet);
    }

    pub fn add_network_security_group(&self, nsg: NetworkSecurityGroup) {
        self.state.lock().nsgs.insert(nsg.id.clone(), nsg);
    }

    /// Register a running instance with the given VNICs attached.
    pub fn add_instance(&self, instance: Instance, vnics: Vec<Vnic>) {
        let mut state = self.state.lock();
        for vnic in vnics {
            let attachment = VnicAttachment {
                id: format!("ocid1.vnicattachment.fake.{}", vnic.id),
                instance_id: instance.id.clone(),
                vnic_id: Some(vnic.id.clone()),
                subnet_id: vnic.subnet_id.clone(),
                lifecycle_state: "ATTACHED".to_string(),
            };
            state.vnic_attachments.push(attachment);
            state.vnics.insert(vnic.id.clone(), vnic);
        }
        state.instances.insert(instance.id.clone(), instance);
    }

    /// Make launches of `shape` in `availability_domain` fail with `err`.
    pub fn fail_launch(&self, shape: &str, availability_domain: &str, err: ProviderError) {
        self.state
            .lock()
            .launch_errors
            .insert((shape.to_string(), availability_domain.to_string()), err);
    }

    /// Launch requests received, successful or not.
    pub fn launched(&self) -> Vec<LaunchInstanceDetails> {
        self.state.lock().launched.clone()
    }

    pub fn list_shapes_calls(&self) -> usize {
        self.list_shapes_calls.load(Ordering::SeqCst)
    }

    fn next_id(state: &mut FakeState, kind: &str) -> String {
        state.next_id += 1;
        format!("ocid1.{}.fake.{}", kind, state.next_id)
    }
}

fn not_found(kind: &str, id: &str) -> ProviderError {
    ProviderError::NotFound(format!("{} {}", kind, id))
}

fn page_of<T: Clone>(items: &[T], page: Option<String>, size: usize) -> Result<Page<T>> {
    let start: usize = match page {
        Some(p) => p
            .parse()
            .map_err(|_| ProviderError::api(400, "InvalidParameter", "bad page token"))?,
        None => 0,
    };
    let end = (start + size).min(items.len());
    let next_page = (end < items.len()).then(|| end.to_string());
    Ok(Page {
        items: items.get(start..end).unwrap_or_default().to_vec(),
        next_page,
    })
}

#[async_trait]
impl ComputeApi for FakeOci {
    async fn list_availability_domains(
        &self,
        _compartment_id: &str,
    ) -> Result<Vec<AvailabilityDomain>> {
        Ok(self
            .state
            .lock()
            .availability_domains
            .iter()
            .map(|name| AvailabilityDomain {
                name: name.clone(),
                id: format!("ocid1.availabilitydomain.fake.{}", name),
            })
            .collect())
    }

    async fn list_shapes(
        &self,
        _compartment_id: &str,
        availability_domain: &str,
        page: Option<String>,
    ) -> Result<Page<Shape>> {
        self.list_shapes_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        let shapes = state
            .shapes
            .get(availability_domain)
            .cloned()
            .unwrap_or_default();
        page_of(&shapes, page, SHAPE_PAGE_SIZE)
    }

    async fn get_image(&self, image_id: &str) -> Result<Image> {
        self.state
            .lock()
            .images
            .get(image_id)
            .cloned()
            .ok_or_else(|| not_found("image", image_id))
    }

    async fn launch_instance(&self, details: &LaunchInstanceDetails) -> Result<Instance> {
        let mut state = self.state.lock();
        state.launched.push(details.clone());
        let key = (details.shape.clone(), details.availability_domain.clone());
        if let Some(err) = state.launch_errors.get(&key) {
            return Err(err.clone());
        }

        let id = Self::next_id(&mut state, "instance");
        let vnic_id = Self::next_id(&mut state, "vnic");
        let instance = Instance {
            id: id.clone(),
            display_name: details.display_name.clone(),
            availability_domain: details.availability_domain.clone(),
            compartment_id: details.compartment_id.clone(),
            shape: details.shape.clone(),
            lifecycle_state: "PROVISIONING".to_string(),
            image_id: Some(details.source_details.image_id.clone()),
            shape_config: details.shape_config.as_ref().map(|c| InstanceShapeConfig {
                ocpus: Some(c.ocpus),
                memory_in_gbs: Some(c.memory_in_gbs),
                vcpus: None,
            }),
            freeform_tags: details.freeform_tags.clone(),
            defined_tags: details.defined_tags.clone(),
            preemptible_instance_config: details.preemptible_instance_config.clone(),
            time_created: Some(chrono::Utc::now().to_rfc3339()),
        };
        let vnic = Vnic {
            id: vnic_id.clone(),
            subnet_id: details.create_vnic_details.subnet_id.clone(),
            is_primary: Some(true),
            nsg_ids: details.create_vnic_details.nsg_ids.clone(),
            private_ip: None,
        };
        state.vnic_attachments.push(VnicAttachment {
            id: format!("ocid1.vnicattachment.fake.{}", vnic_id),
            instance_id: id.clone(),
            vnic_id: Some(vnic_id.clone()),
            subnet_id: vnic.subnet_id.clone(),
            lifecycle_state: "ATTACHED".to_string(),
        });
        state.vnics.insert(vnic_id, vnic);
        state.instances.insert(id, instance.clone());
        Ok(instance)
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| not_found("instance", instance_id))?;
        instance.lifecycle_state = LIFECYCLE_TERMINATED.to_string();
        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Instance> {
        self.state
            .lock()
            .instances
            .get(instance_id)
            .cloned()
            .ok_or_else(|| not_found("instance", instance_id))
    }

    async fn list_instances(
        &self,
        compartment_id: &str,
        page: Option<String>,
    ) -> Result<Page<Instance>> {
        let state = self.state.lock();
        let instances: Vec<Instance> = state
            .instances
            .values()
            .filter(|i| i.compartment_id == compartment_id)
            .cloned()
            .collect();
        page_of(&instances, page, usize::MAX)
    }

    async fn list_vnic_attachments(
        &self,
        _compartment_id: &str,
        instance_id: &str,
        page: Option<String>,
    ) -> Result<Page<VnicAttachment>> {
        let state = self.state.lock();
        let attachments: Vec<VnicAttachment> = state
            .vnic_attachments
            .iter()
            .filter(|a| a.instance_id == instance_id)
            .cloned()
            .collect();
        page_of(&attachments, page, usize::MAX)
    }
}

#[async_trait]
impl NetworkApi for FakeOci {
    async fn list_subnets(&self, _compartment_id: &str, page: Option<String>) -> Result<Page<Subnet>> {
        let subnets: Vec<Subnet> = self.state.lock().subnets.values().cloned().collect();
        page_of(&subnets, page, usize::MAX)
    }

    async fn list_network_security_groups(
        &self,
        _compartment_id: &str,
        page: Option<String>,
    ) -> Result<Page<NetworkSecurityGroup>> {
        let nsgs: Vec<NetworkSecurityGroup> = self.state.lock().nsgs.values().cloned().collect();
        page_of(&nsgs, page, usize::MAX)
    }

    async fn get_vnic(&self, vnic_id: &str) -> Result<Vnic> {
        self.state
            .lock()
            .vnics
            .get(vnic_id)
            .cloned()
            .ok_or_else(|| not_found("vnic", vnic_id))
    }

    async fn get_subnet(&self, subnet_id: &str) -> Result<Subnet> {
        self.state
            .lock()
            .subnets
            .get(subnet_id)
            .cloned()
            .ok_or_else(|| not_found("subnet", subnet_id))
    }

    async fn get_network_security_group(&self, nsg_id: &str) -> Result<NetworkSecurityGroup> {
        self.state
            .lock()
            .nsgs
            .get(nsg_id)
            .cloned()
            .ok_or_else(|| not_found("network security group", nsg_id))
    }

    async fn subnet_available_ips(&self, subnet_id: &str) -> Result<u64> {
        self.state
            .lock()
            .subnet_available_ips
            .get(subnet_id)
            .copied()
            .ok_or_else(|| not_found("subnet", subnet_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::collect_pages;

    #[tokio::test]
    async fn test_list_shapes_is_paged() {
        let fake = FakeOci::new();
        for name in ["a", "b", "c"] {
            fake.add_shape(
                "AD-1",
                Shape {
                    shape: name.to_string(),
                    ..Default::default()
                },
            );
        }
        let first = fake.list_shapes("c", "AD-1", None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.next_page.as_deref(), Some("2"));

        let all = collect_pages(|page| fake.list_shapes("c", "AD-1", page))
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(fake.list_shapes_calls(), 3);
    }

    #[tokio::test]
    async fn test_terminate_unknown_instance() {
        let fake = FakeOci::new();
        let err = fake.terminate_instance("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
