use meridian_core::{
    Classification, EntityDetail, EntityProxy, InstanceAuditHeader, InstanceProperties,
};
use meridian_graph::{
    Direction, Element, ElementId, GraphTransaction, PropertyMap, Value, VertexRecord,
};

use super::{is_proxy, ElementMapper};
use crate::error::{Result, StoreError};
use crate::keys::{self, Prefix};
use crate::qualifier;

impl ElementMapper {
    pub fn validate_entity_detail(&self, detail: &EntityDetail) -> Result<()> {
        self.validate_header(&detail.header, Some(&detail.guid), &detail.guid)?;
        self.validate_properties(&detail.properties, &detail.guid)?;
        detail
            .classifications
            .iter()
            .try_for_each(|c| self.validate_classification(c, &detail.guid))
    }

    pub fn validate_entity_proxy(&self, proxy: &EntityProxy) -> Result<()> {
        self.validate_header(&proxy.header, Some(&proxy.guid), &proxy.guid)?;
        self.validate_properties(&proxy.unique_properties, &proxy.guid)?;
        proxy
            .classifications
            .iter()
            .try_for_each(|c| self.validate_classification(c, &proxy.guid))
    }

    /// Write a detail onto `vertex`, clearing the proxy flag.
    ///
    /// Classifications are reconciled separately by the store.
    pub fn write_entity_detail(
        &self,
        tx: &mut dyn GraphTransaction,
        vertex: ElementId,
        detail: &EntityDetail,
        existing: Option<&PropertyMap>,
    ) -> Result<()> {
        let element = Element::Vertex(vertex);
        self.write_entity_core(tx, element, &detail.header, &detail.guid, false)?;
        let url_key = Prefix::Entity.key(keys::INSTANCE_URL);
        match &detail.instance_url {
            Some(url) => tx.set_property(element, &url_key, url.as_str().into())?,
            None => tx.remove_property(element, &url_key)?,
        }
        self.write_properties(
            tx,
            element,
            Prefix::Entity,
            detail.type_name(),
            &detail.properties,
            existing,
            &detail.guid,
        )
    }

    /// Write a proxy onto `vertex`; only its unique properties are stored.
    pub fn write_entity_proxy(
        &self,
        tx: &mut dyn GraphTransaction,
        vertex: ElementId,
        proxy: &EntityProxy,
        existing: Option<&PropertyMap>,
    ) -> Result<()> {
        let element = Element::Vertex(vertex);
        self.write_entity_core(tx, element, &proxy.header, &proxy.guid, true)?;
        tx.remove_property(element, &Prefix::Entity.key(keys::INSTANCE_URL))?;
        self.write_properties(
            tx,
            element,
            Prefix::Entity,
            proxy.type_name(),
            &proxy.unique_properties,
            existing,
            &proxy.guid,
        )
    }

    fn write_entity_core(
        &self,
        tx: &mut dyn GraphTransaction,
        element: Element,
        header: &InstanceAuditHeader,
        guid: &str,
        proxy: bool,
    ) -> Result<()> {
        tx.set_property(element, &Prefix::Entity.key(keys::GUID), guid.into())?;
        tx.set_property(element, &Prefix::Entity.key(keys::IS_PROXY), Value::Bool(proxy))?;
        self.write_header(tx, element, Prefix::Entity, header, guid)
    }

    /// Materialize the full entity. Fails for proxy-only vertices.
    pub fn read_entity_detail(
        &self,
        tx: &mut dyn GraphTransaction,
        vertex: &VertexRecord,
    ) -> Result<EntityDetail> {
        let method = "read_entity_detail";
        let guid = entity_guid(vertex)?;
        if is_proxy(vertex) {
            return Err(StoreError::EntityProxyOnly { guid });
        }
        let props = &vertex.properties;
        Ok(EntityDetail {
            header: self.read_header(props, Prefix::Entity, &guid, method)?,
            instance_url: vertex
                .get_str(&Prefix::Entity.key(keys::INSTANCE_URL))
                .map(str::to_string),
            properties: self.read_properties(props, Prefix::Entity, &guid, method)?,
            classifications: self.read_classifications(tx, vertex.id)?,
            guid,
        })
    }

    /// Materialize the proxy view of any entity vertex, detail or proxy.
    pub fn read_entity_proxy(
        &self,
        tx: &mut dyn GraphTransaction,
        vertex: &VertexRecord,
    ) -> Result<EntityProxy> {
        let method = "read_entity_proxy";
        let guid = entity_guid(vertex)?;
        let props = &vertex.properties;
        let header = self.read_header(props, Prefix::Entity, &guid, method)?;
        let all = self.read_properties(props, Prefix::Entity, &guid, method)?;
        Ok(EntityProxy {
            unique_properties: self.unique_subset(header.type_name(), &all)?,
            classifications: self.read_classifications(tx, vertex.id)?,
            header,
            guid,
        })
    }

    fn unique_subset(
        &self,
        type_name: &str,
        props: &InstanceProperties,
    ) -> Result<InstanceProperties> {
        let attrs = qualifier::attribute_definitions(self.registry(), type_name)?;
        let mut unique = InstanceProperties::new();
        for (name, value) in props.iter() {
            if attrs.get(name).is_some_and(|a| a.unique) {
                unique.insert(name.clone(), value.clone());
            }
        }
        Ok(unique)
    }

    /// Classifications attached to an entity vertex, ordered by name.
    pub fn read_classifications(
        &self,
        tx: &mut dyn GraphTransaction,
        entity: ElementId,
    ) -> Result<Vec<Classification>> {
        let mut out = Vec::new();
        for (vertex, _edge) in self.attached_classifications(tx, entity)? {
            out.push(self.read_classification(&vertex)?);
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Classification vertices reached over outbound Classifier edges.
    pub fn attached_classifications(
        &self,
        tx: &mut dyn GraphTransaction,
        entity: ElementId,
    ) -> Result<Vec<(VertexRecord, ElementId)>> {
        let mut out = Vec::new();
        for edge in tx.edges(entity, Direction::Out, Some(keys::CLASSIFIER_LABEL))? {
            if let Some(vertex) = tx.vertex(edge.in_vertex)? {
                out.push((vertex, edge.id));
            }
        }
        Ok(out)
    }
}

fn entity_guid(vertex: &VertexRecord) -> Result<String> {
    vertex
        .get_str(&Prefix::Entity.key(keys::GUID))
        .map(str::to_string)
        .ok_or_else(|| {
            StoreError::mapping(&vertex.id.to_string(), "entity_guid", "vertex has no guid")
        })
}
