//! In-process document service for offline use (`--demo`) and tests.
//!
//! `DemoService` answers the same REST contract as the real backend, backed by
//! small in-memory tables that mirror the service's relational schema
//! (documents, elements, relationship types, relationships keyed by numeric
//! ids). Status codes and `detail` messages follow the real service so the
//! gateway's error paths behave identically.

use std::sync::Mutex;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::client::{ClientError, ClientResult, Download, Endpoint, Method, Transport};
use crate::model::{CandidateRelationship, ValidatedRelationship};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocKind {
    Reference,
    Mapping,
}

#[derive(Debug, Clone)]
struct DocRow {
    id: i64,
    doc_identifier: String,
    name: String,
    version: String,
    website: String,
    kind: DocKind,
}

#[derive(Debug, Clone)]
struct ElementRow {
    id: i64,
    document_id: i64,
    element_type: String,
    element_identifier: String,
    title: String,
    text: String,
}

#[derive(Debug, Clone)]
struct TypeRow {
    id: i64,
    relationship_identifier: String,
    description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RelRow {
    source_id: i64,
    dest_id: i64,
    prov_doc_id: i64,
    type_id: i64,
}

#[derive(Debug, Default)]
struct Tables {
    documents: Vec<DocRow>,
    elements: Vec<ElementRow>,
    types: Vec<TypeRow>,
    relationships: Vec<RelRow>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn document(&self, doc_identifier: &str) -> Option<&DocRow> {
        self.documents
            .iter()
            .find(|d| d.doc_identifier == doc_identifier)
    }

    fn document_by_id(&self, id: i64) -> Option<&DocRow> {
        self.documents.iter().find(|d| d.id == id)
    }

    fn element(&self, doc_identifier: &str, element_identifier: &str) -> Option<&ElementRow> {
        let doc = self.document(doc_identifier)?;
        self.elements
            .iter()
            .find(|e| e.document_id == doc.id && e.element_identifier == element_identifier)
    }

    fn element_by_id(&self, id: i64) -> Option<&ElementRow> {
        self.elements.iter().find(|e| e.id == id)
    }

    fn type_by_id(&self, id: i64) -> Option<&TypeRow> {
        self.types.iter().find(|t| t.id == id)
    }

    fn element_json(&self, el: &ElementRow, with_doc: bool) -> Value {
        let mut row = json!({
            "element_identifier": el.element_identifier,
            "element_type": el.element_type,
            "title": el.title,
            "text": el.text,
        });
        if with_doc {
            if let Some(doc) = self.document_by_id(el.document_id) {
                row["doc_identifier"] = json!(doc.doc_identifier);
            }
        }
        row
    }

    /// Fully-resolved relationship row, `None` when a reference dangles.
    fn relationship_fields(&self, rel: &RelRow) -> Option<[String; 6]> {
        let source = self.element_by_id(rel.source_id)?;
        let dest = self.element_by_id(rel.dest_id)?;
        Some([
            source.element_identifier.clone(),
            self.document_by_id(source.document_id)?.doc_identifier.clone(),
            dest.element_identifier.clone(),
            self.document_by_id(dest.document_id)?.doc_identifier.clone(),
            self.document_by_id(rel.prov_doc_id)?.doc_identifier.clone(),
            self.type_by_id(rel.type_id)?.relationship_identifier.clone(),
        ])
    }
}

const RELATIONSHIP_COLUMNS: [&str; 6] = [
    "source_element_identifier",
    "source_doc_identifier",
    "dest_element_identifier",
    "dest_doc_identifier",
    "provenance_doc_identifier",
    "relationship_identifier",
];

fn relationship_json(fields: [String; 6]) -> Value {
    let mut row = serde_json::Map::new();
    for (column, value) in RELATIONSHIP_COLUMNS.iter().zip(fields) {
        row.insert((*column).to_string(), Value::String(value));
    }
    Value::Object(row)
}

fn not_found(detail: &str) -> ClientError {
    ClientError::from_status(404, "Not Found", Some(detail))
}

fn bad_request(detail: &str) -> ClientError {
    ClientError::from_status(400, "Bad Request", Some(detail))
}

fn unprocessable(detail: String) -> ClientError {
    ClientError::from_status(422, "Unprocessable Entity", Some(&detail))
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: Option<&Value>) -> ClientResult<T> {
    let body = body.cloned().unwrap_or(Value::Null);
    serde_json::from_value(body).map_err(|e| unprocessable(e.to_string()))
}

/// In-memory implementation of the document service contract.
pub struct DemoService {
    tables: Mutex<Tables>,
}

impl Default for DemoService {
    fn default() -> Self {
        Self::seeded()
    }
}

impl DemoService {
    /// An empty service with only the relationship-type table filled.
    pub fn empty() -> Self {
        let service = Self {
            tables: Mutex::new(Tables::default()),
        };
        for (identifier, description) in [
            ("mitigates", "Source element mitigates the destination element"),
            ("subset_of", "Source element is a subset of the destination element"),
            ("intersects_with", "Source and destination elements overlap"),
            ("equal", "Source and destination elements are equivalent"),
        ] {
            service.add_relationship_type(identifier, description);
        }
        service
    }

    /// The demo catalog: NIST CSF (three subcategories) and a slice of
    /// MITRE ATT&CK, plus one earlier mapping.
    pub fn seeded() -> Self {
        let service = Self::empty();
        service.add_document("CSF", "NIST Cybersecurity Framework", "2.0", "https://www.nist.gov/cyberframework");
        service.add_element(
            "CSF",
            "subcategory",
            "GV.OC-01",
            "Organizational Context",
            "The organizational mission is understood and informs cybersecurity risk management",
        );
        service.add_element(
            "CSF",
            "subcategory",
            "PR.AT-01",
            "Awareness and Training",
            "Personnel are provided with awareness and training so that they possess the knowledge and skills to perform general tasks with cybersecurity risks in mind",
        );
        service.add_element(
            "CSF",
            "subcategory",
            "DE.CM-01",
            "Continuous Monitoring",
            "Networks and network services are monitored to find potentially adverse events",
        );

        service.add_document("ATTACK", "MITRE ATT&CK Enterprise", "15.1", "https://attack.mitre.org");
        service.add_element(
            "ATTACK",
            "technique",
            "T1059",
            "Command and Scripting Interpreter",
            "Adversaries may abuse command and script interpreters to execute commands, scripts, or binaries",
        );
        service.add_element(
            "ATTACK",
            "technique",
            "T1078",
            "Valid Accounts",
            "Adversaries may obtain and abuse credentials of existing accounts",
        );
        service.add_element(
            "ATTACK",
            "technique",
            "T1190",
            "Exploit Public-Facing Application",
            "Adversaries may attempt to exploit a weakness in an Internet-facing host or system",
        );
        service.add_element(
            "ATTACK",
            "technique",
            "T1204",
            "User Execution",
            "Adversaries may rely on a user opening a \"malicious\" file & running it (l'exécution)",
        );
        service.add_element(
            "ATTACK",
            "technique",
            "T1566",
            "Phishing",
            "Adversaries may send phishing messages to gain access to victim systems",
        );
        service.add_element(
            "ATTACK",
            "sub-technique",
            "T1566.001",
            "Spearphishing Attachment",
            "Adversaries may send emails with a malicious attachment",
        );

        service.add_mapping_document("SEED_MAPPING", "Mapping: seed data");
        let _ = service.insert_relationship(
            &CandidateRelationship {
                source_element_identifier: "DE.CM-01".into(),
                source_doc_identifier: "CSF".into(),
                dest_element_identifier: "T1059".into(),
                dest_doc_identifier: "ATTACK".into(),
                relationship_identifier: "intersects_with".into(),
            },
            "SEED_MAPPING",
        );
        service
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        // A panic while holding the lock leaves plain data behind; keep serving.
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_document(&self, doc_identifier: &str, name: &str, version: &str, website: &str) {
        self.insert_document(doc_identifier, name, version, website, DocKind::Reference);
    }

    fn add_mapping_document(&self, doc_identifier: &str, name: &str) {
        self.insert_document(
            doc_identifier,
            name,
            "1.0",
            "Generated by crosswalk",
            DocKind::Mapping,
        );
    }

    fn insert_document(
        &self,
        doc_identifier: &str,
        name: &str,
        version: &str,
        website: &str,
        kind: DocKind,
    ) -> i64 {
        let mut t = self.tables();
        if let Some(existing) = t.document(doc_identifier) {
            return existing.id;
        }
        let id = t.next_id();
        t.documents.push(DocRow {
            id,
            doc_identifier: doc_identifier.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            website: website.to_string(),
            kind,
        });
        id
    }

    /// Add an element; ignored when the document is unknown or the row exists.
    pub fn add_element(
        &self,
        doc_identifier: &str,
        element_type: &str,
        element_identifier: &str,
        title: &str,
        text: &str,
    ) {
        let mut t = self.tables();
        let Some(document_id) = t.document(doc_identifier).map(|d| d.id) else {
            return;
        };
        if t.element(doc_identifier, element_identifier).is_some() {
            return;
        }
        let id = t.next_id();
        t.elements.push(ElementRow {
            id,
            document_id,
            element_type: element_type.to_string(),
            element_identifier: element_identifier.to_string(),
            title: title.to_string(),
            text: text.to_string(),
        });
    }

    pub fn add_relationship_type(&self, identifier: &str, description: &str) {
        let mut t = self.tables();
        if t.types.iter().any(|ty| ty.relationship_identifier == identifier) {
            return;
        }
        let id = t.next_id();
        t.types.push(TypeRow {
            id,
            relationship_identifier: identifier.to_string(),
            description: description.to_string(),
        });
    }

    fn insert_relationship(
        &self,
        candidate: &CandidateRelationship,
        provenance: &str,
    ) -> ClientResult<bool> {
        let validated = self.validate(candidate)?;
        let mut t = self.tables();
        let prov_doc_id = t
            .document(provenance)
            .map(|d| d.id)
            .ok_or_else(|| not_found("Document not found"))?;
        Ok(Self::insert_row(&mut t, &validated, prov_doc_id))
    }

    fn insert_row(t: &mut Tables, rel: &ValidatedRelationship, prov_doc_id: i64) -> bool {
        let row = RelRow {
            source_id: rel.source_element_id,
            dest_id: rel.dest_element_id,
            prov_doc_id,
            type_id: rel.relationship_type_id,
        };
        if t.relationships.contains(&row) {
            return false;
        }
        t.relationships.push(row);
        true
    }

    /// Number of persisted relationships.
    pub fn relationship_count(&self) -> usize {
        self.tables().relationships.len()
    }

    /// Identifiers of every provenance document created so far.
    pub fn provenance_documents(&self) -> Vec<String> {
        self.tables()
            .documents
            .iter()
            .filter(|d| d.kind == DocKind::Mapping)
            .map(|d| d.doc_identifier.clone())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Endpoint handlers
    // -----------------------------------------------------------------------

    fn list_documents(&self) -> Value {
        let t = self.tables();
        let mut docs: Vec<&DocRow> = t
            .documents
            .iter()
            .filter(|d| d.kind == DocKind::Reference)
            .collect();
        docs.sort_by(|a, b| a.name.cmp(&b.name));
        let documents: Vec<Value> = docs
            .into_iter()
            .map(|d| {
                json!({
                    "doc_identifier": d.doc_identifier,
                    "name": d.name,
                    "version": d.version,
                    "website": d.website,
                })
            })
            .collect();
        json!({ "documents": documents })
    }

    fn get_document(&self, doc_identifier: &str) -> ClientResult<Value> {
        let t = self.tables();
        let doc = t
            .document(doc_identifier)
            .ok_or_else(|| not_found("Document not found"))?;
        let elements: Vec<Value> = t
            .elements
            .iter()
            .filter(|e| e.document_id == doc.id)
            .map(|e| t.element_json(e, true))
            .collect();
        let types: Vec<Value> = t
            .types
            .iter()
            .map(|ty| {
                json!({
                    "relationship_identifier": ty.relationship_identifier,
                    "description": ty.description,
                })
            })
            .collect();
        let relationships: Vec<Value> = t
            .relationships
            .iter()
            .filter_map(|rel| t.relationship_fields(rel))
            .filter(|f| f[1] == doc_identifier || f[3] == doc_identifier)
            .map(relationship_json)
            .collect();
        Ok(json!({
            "documents": [{
                "doc_identifier": doc.doc_identifier,
                "name": doc.name,
                "version": doc.version,
                "website": doc.website,
            }],
            "elements": elements,
            "relationship_types": types,
            "relationships": relationships,
        }))
    }

    fn list_elements(&self, doc_identifier: &str, search: Option<&str>) -> Value {
        let t = self.tables();
        let Some(doc) = t.document(doc_identifier) else {
            return json!({ "elements": [] });
        };
        let needle = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        let mut matches: Vec<&ElementRow> = t
            .elements
            .iter()
            .filter(|e| e.document_id == doc.id)
            .filter(|e| match &needle {
                Some(n) => {
                    e.element_identifier.to_lowercase().contains(n)
                        || e.title.to_lowercase().contains(n)
                        || e.text.to_lowercase().contains(n)
                }
                None => true,
            })
            .collect();
        matches.sort_by(|a, b| a.element_identifier.cmp(&b.element_identifier));
        let elements: Vec<Value> = matches.into_iter().map(|e| t.element_json(e, false)).collect();
        json!({ "elements": elements })
    }

    fn document_id(&self, doc_identifier: &str) -> ClientResult<Value> {
        let t = self.tables();
        let doc = t
            .document(doc_identifier)
            .ok_or_else(|| not_found("Document not found"))?;
        Ok(json!({ "document_id": doc.id }))
    }

    fn validate(&self, candidate: &CandidateRelationship) -> ClientResult<ValidatedRelationship> {
        let t = self.tables();
        let source = t.element(
            &candidate.source_doc_identifier,
            &candidate.source_element_identifier,
        );
        let dest = t.element(
            &candidate.dest_doc_identifier,
            &candidate.dest_element_identifier,
        );
        let ty = t
            .types
            .iter()
            .find(|ty| ty.relationship_identifier == candidate.relationship_identifier);
        match (source, dest, ty) {
            (Some(source), Some(dest), Some(ty)) => Ok(ValidatedRelationship {
                source_element_id: source.id,
                dest_element_id: dest.id,
                relationship_type_id: ty.id,
            }),
            _ => Err(bad_request("Invalid identifiers provided")),
        }
    }

    fn create_provenance(&self, body: Option<&Value>) -> ClientResult<Value> {
        #[derive(Deserialize)]
        struct Req {
            target_doc_identifier: String,
            source_doc_identifier: String,
        }
        let req: Req = parse_body(body)?;
        let name = {
            let t = self.tables();
            match (
                t.document(&req.target_doc_identifier),
                t.document(&req.source_doc_identifier),
            ) {
                (Some(target), Some(source)) => {
                    format!("Mapping: {} to {}", target.name, source.name)
                }
                _ => return Err(bad_request("Target or source document not found")),
            }
        };
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let base = format!(
            "MAPPING_{}_TO_{}_{stamp}",
            req.target_doc_identifier, req.source_doc_identifier
        );
        let identifier = {
            let t = self.tables();
            let mut identifier = base.clone();
            let mut n = 1;
            while t.document(&identifier).is_some() {
                n += 1;
                identifier = format!("{base}_{n}");
            }
            identifier
        };
        self.add_mapping_document(&identifier, &name);
        Ok(json!({
            "provenance_doc_identifier": identifier,
            "provenance_doc_name": name,
            "message": "Provenance document created successfully",
        }))
    }

    fn bulk_insert(&self, body: Option<&Value>) -> ClientResult<Value> {
        #[derive(Deserialize)]
        struct Req {
            #[serde(default)]
            provenance_doc_id: Option<i64>,
            #[serde(default)]
            relationships: Vec<ValidatedRelationship>,
        }
        let req: Req = parse_body(body)?;
        let Some(prov_doc_id) = req.provenance_doc_id.filter(|_| !req.relationships.is_empty())
        else {
            return Err(bad_request("Missing provenance document ID or relationships"));
        };
        let mut t = self.tables();
        let success_count = req
            .relationships
            .iter()
            .filter(|rel| Self::insert_row(&mut t, rel, prov_doc_id))
            .count();
        Ok(json!({
            "message": format!("{success_count} relationships created successfully"),
            "success_count": success_count,
            "total_attempted": req.relationships.len(),
        }))
    }

    fn export_csv(&self, endpoint: &Endpoint) -> ClientResult<Download> {
        let scope: Vec<String> = endpoint
            .query_value("provenance_docs")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let t = self.tables();
        let mut rows: Vec<[String; 6]> = t
            .relationships
            .iter()
            .filter_map(|rel| t.relationship_fields(rel))
            .filter(|f| scope.is_empty() || scope.contains(&f[4]))
            .collect();
        if rows.is_empty() {
            return Err(not_found("No relationships found"));
        }
        rows.sort_by(|a, b| (&a[1], &a[0]).cmp(&(&b[1], &b[0])));

        let mut out = String::new();
        out.push_str(&RELATIONSHIP_COLUMNS.join(","));
        out.push_str(",comment\n");
        for row in &rows {
            let cells: Vec<String> = row.iter().map(|c| csv_cell(c)).collect();
            out.push_str(&cells.join(","));
            out.push_str(",\n");
        }
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        Ok(Download {
            filename: format!("relationships_{stamp}.csv"),
            content_type: Some("text/csv".into()),
            bytes: out.into_bytes(),
        })
    }
}

fn csv_cell(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

impl Transport for DemoService {
    fn call(
        &self,
        method: Method,
        endpoint: &Endpoint,
        body: Option<&Value>,
    ) -> ClientResult<Value> {
        let segments: Vec<&str> = endpoint.segments().iter().map(String::as_str).collect();
        match (method, segments.as_slice()) {
            (Method::Get, ["documents"]) => Ok(self.list_documents()),
            (Method::Get, ["getDocument"]) => {
                let doc = endpoint
                    .query_value("document_identifier")
                    .ok_or_else(|| unprocessable("document_identifier is required".into()))?;
                self.get_document(doc)
            }
            (Method::Get, ["documents", doc, "elements"]) => {
                Ok(self.list_elements(doc, endpoint.query_value("search")))
            }
            (Method::Get, ["documents", doc, "id"]) => self.document_id(doc),
            (Method::Post, ["provenance-documents"]) => self.create_provenance(body),
            (Method::Post, ["relationships"]) => {
                let candidate: CandidateRelationship = parse_body(body)?;
                let v = self.validate(&candidate)?;
                Ok(json!({
                    "source_element_id": v.source_element_id,
                    "dest_element_id": v.dest_element_id,
                    "relationship_type_id": v.relationship_type_id,
                    "message": "Relationship validated successfully",
                }))
            }
            (Method::Post, ["relationships", "bulk"]) => self.bulk_insert(body),
            _ => Err(not_found("Not Found")),
        }
    }

    fn download(&self, endpoint: &Endpoint) -> ClientResult<Download> {
        let segments: Vec<&str> = endpoint.segments().iter().map(String::as_str).collect();
        match segments.as_slice() {
            ["relationships", "export"] => {
                match endpoint.query_value("format").unwrap_or("excel") {
                    "excel" | "csv" => self.export_csv(endpoint),
                    other => Err(unprocessable(format!("unsupported format \"{other}\""))),
                }
            }
            _ => Err(not_found("Not Found")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(service: &DemoService, endpoint: Endpoint) -> ClientResult<Value> {
        service.call(Method::Get, &endpoint, None)
    }

    #[test]
    fn documents_exclude_mapping_documents() {
        let service = DemoService::seeded();
        let docs = get(&service, Endpoint::new(&["documents"])).unwrap();
        let ids: Vec<&str> = docs["documents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["doc_identifier"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["ATTACK", "CSF"]);
    }

    #[test]
    fn element_search_is_case_insensitive() {
        let service = DemoService::seeded();
        let found = get(
            &service,
            Endpoint::new(&["documents", "ATTACK", "elements"]).with_query("search", "PHISH"),
        )
        .unwrap();
        let ids: Vec<&str> = found["elements"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["element_identifier"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["T1566", "T1566.001"]);
    }

    #[test]
    fn unknown_identifiers_fail_validation() {
        let service = DemoService::seeded();
        let body = serde_json::to_value(CandidateRelationship {
            source_element_identifier: "NOPE".into(),
            source_doc_identifier: "CSF".into(),
            dest_element_identifier: "T1566".into(),
            dest_doc_identifier: "ATTACK".into(),
            relationship_identifier: "mitigates".into(),
        })
        .unwrap();
        let err = service
            .call(Method::Post, &Endpoint::new(&["relationships"]), Some(&body))
            .unwrap_err();
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn provenance_identifiers_never_collide() {
        let service = DemoService::seeded();
        let body = json!({"target_doc_identifier": "CSF", "source_doc_identifier": "ATTACK"});
        let ep = Endpoint::new(&["provenance-documents"]);
        let a = service.call(Method::Post, &ep, Some(&body)).unwrap();
        let b = service.call(Method::Post, &ep, Some(&body)).unwrap();
        assert_ne!(a["provenance_doc_identifier"], b["provenance_doc_identifier"]);
        assert_eq!(
            a["provenance_doc_name"],
            "Mapping: NIST Cybersecurity Framework to MITRE ATT&CK Enterprise"
        );
        assert!(
            a["provenance_doc_identifier"]
                .as_str()
                .unwrap()
                .starts_with("MAPPING_CSF_TO_ATTACK_")
        );
    }

    #[test]
    fn bulk_requires_id_and_relationships() {
        let service = DemoService::seeded();
        let err = service
            .call(
                Method::Post,
                &Endpoint::new(&["relationships", "bulk"]),
                Some(&json!({"provenance_doc_id": 1, "relationships": []})),
            )
            .unwrap_err();
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn export_filters_by_provenance_and_reports_empty() {
        let service = DemoService::seeded();
        let all = service
            .download(&Endpoint::new(&["relationships", "export"]).with_query("format", "csv"))
            .unwrap();
        let text = String::from_utf8(all.bytes).unwrap();
        assert!(text.starts_with("source_element_identifier,"));
        assert!(text.contains("DE.CM-01,CSF,T1059,ATTACK,SEED_MAPPING,intersects_with"));

        let err = service
            .download(
                &Endpoint::new(&["relationships", "export"])
                    .with_query("format", "csv")
                    .with_query("provenance_docs", "OTHER"),
            )
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn csv_cells_are_quoted_when_needed() {
        assert_eq!(csv_cell("plain"), "plain");
        assert_eq!(csv_cell("a,b"), "\"a,b\"");
        assert_eq!(csv_cell("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
