//! Service layer API for the sample lifecycle and approval workflow.
//!
//! One service instance over one sled database; correctness under concurrent
//! callers rests entirely on transaction discipline. Every multi-step
//! transition runs inside a single sled transaction (serializable, the
//! embedded analogue of row locking) and either commits whole or not at all.
//! Rendering and hashing happen outside transactions, they are pure.

use crate::approval::{self, ApprovalEntry};
use crate::artifact::ComputedArtifact;
use crate::audit::{self, AuditEvent, AuditSink, TreeAuditSink};
use crate::change_request::ChangeRequest;
use crate::checklist::IntakeChecklist;
use crate::config::{EngineConfig, WorkflowGroup};
use crate::custody::{CustodyOutcome, CustodyStep};
use crate::document::{
    BlobStore, Document, DocumentKind, DocumentSummary, PlainRenderer, Renderer, Signature,
    TreeBlobStore, Verification,
};
use crate::error::{Error, Result};
use crate::lifecycle::{self, RequestStatus};
use crate::roles::{Actor, Role};
use crate::sample::{CrosscheckStatus, Sample, VerificationRecord};
use crate::sequence::{self, SequenceAllocator};
use crate::utils::{TimeStamp, from_cbor, new_uuid_to_bech32, to_cbor};
use sled::Tree;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use std::sync::Arc;

type TxResult<T> = std::result::Result<T, ConflictableTransactionError<Error>>;

fn tx_err(e: Error) -> ConflictableTransactionError<Error> {
    ConflictableTransactionError::Abort(e)
}

fn tx_get<T>(tree: &TransactionalTree, key: &str, entity: &'static str) -> TxResult<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    let bytes = tree.get(key.as_bytes())?.ok_or_else(|| {
        tx_err(Error::NotFound {
            entity,
            id: key.to_string(),
        })
    })?;
    from_cbor(&bytes).map_err(tx_err)
}

fn tx_put<T>(tree: &TransactionalTree, key: &str, value: &T) -> TxResult<()>
where
    T: minicbor::Encode<()>,
{
    tree.insert(key.as_bytes(), to_cbor(value).map_err(tx_err)?)?;
    Ok(())
}

fn new_id(hrp: &str) -> Result<String> {
    new_uuid_to_bech32(hrp).map_err(|e| Error::Codec(e.to_string()))
}

/// One generated letter of order in a bulk call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedLetter {
    pub sample_id: String,
    pub document_id: String,
    pub document_hash: String,
}

/// Bulk generation never fails the whole batch for one unready member: the
/// caller is told exactly which ids were excluded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BulkOutcome {
    pub generated: Vec<GeneratedLetter>,
    pub excluded_not_ready: Vec<String>,
}

pub struct LabService {
    config: EngineConfig,
    samples: Tree,
    sequences: Tree,
    checklists: Tree,
    approvals: Tree,
    artifacts: Tree,
    documents: Tree,
    signatures: Tree,
    change_requests: Tree,
    /// sample id -> letter-of-order document id, the exactly-once guard.
    letters: Tree,
    /// verify code / document hash -> document id, for public verification.
    hash_index: Tree,
    /// "{request_id}/{sample_id}" -> sample id, the request grouping.
    request_index: Tree,
    blobs_tree: Tree,
    audit_tree: Tree,
    renderer: Box<dyn Renderer>,
    blobs: Box<dyn BlobStore>,
    audit: Box<dyn AuditSink>,
}

impl LabService {
    pub fn new(db: Arc<sled::Db>) -> Result<Self> {
        Self::with_config(db, EngineConfig::default())
    }

    pub fn with_config(db: Arc<sled::Db>, config: EngineConfig) -> Result<Self> {
        let blobs = Box::new(TreeBlobStore::new(db.open_tree("blobs")?));
        Self::with_backends(db, config, Box::new(PlainRenderer), blobs)
    }

    /// Construct over caller-supplied rendering and blob backends. The
    /// default is [`with_config`](Self::with_config); this seam exists for
    /// alternative renderers and external blob storage.
    pub fn with_backends(
        db: Arc<sled::Db>,
        config: EngineConfig,
        renderer: Box<dyn Renderer>,
        blobs: Box<dyn BlobStore>,
    ) -> Result<Self> {
        let blobs_tree = db.open_tree("blobs")?;
        let audit_tree = db.open_tree("audit")?;
        Ok(Self {
            config,
            samples: db.open_tree("samples")?,
            sequences: db.open_tree("sequences")?,
            checklists: db.open_tree("checklists")?,
            approvals: db.open_tree("approvals")?,
            artifacts: db.open_tree("artifacts")?,
            documents: db.open_tree("documents")?,
            signatures: db.open_tree("signatures")?,
            change_requests: db.open_tree("change_requests")?,
            letters: db.open_tree("letters")?,
            hash_index: db.open_tree("hash_index")?,
            request_index: db.open_tree("request_index")?,
            blobs,
            blobs_tree,
            renderer,
            audit: Box::new(TreeAuditSink::new(db.as_ref().clone(), audit_tree.clone())),
            audit_tree,
        })
    }

    /// Standalone allocator over the same counter tree, mostly for callers
    /// that need codes outside a sample workflow (e.g. parameter codes).
    pub fn allocator(&self) -> SequenceAllocator {
        SequenceAllocator::new(self.sequences.clone())
    }

    /// Number of blobs currently stored; lets tests assert write-once.
    pub fn stored_blob_count(&self) -> usize {
        self.blobs_tree.len()
    }

    fn emit(&self, event: AuditEvent) {
        audit::emit(self.audit.as_ref(), event);
    }

    // ---- lookups ---------------------------------------------------------

    pub fn sample(&self, id: &str) -> Result<Sample> {
        match self.samples.get(id.as_bytes())? {
            Some(bytes) => from_cbor(&bytes),
            None => Err(Error::NotFound {
                entity: "sample",
                id: id.to_string(),
            }),
        }
    }

    pub fn document(&self, id: &str) -> Result<Document> {
        match self.documents.get(id.as_bytes())? {
            Some(bytes) => from_cbor(&bytes),
            None => Err(Error::NotFound {
                entity: "document",
                id: id.to_string(),
            }),
        }
    }

    pub fn intake_checklist(&self, sample_id: &str) -> Result<Option<IntakeChecklist>> {
        match self.checklists.get(sample_id.as_bytes())? {
            Some(bytes) => Ok(Some(from_cbor(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn approval(&self, subject_id: &str, role: Role) -> Result<Option<ApprovalEntry>> {
        let key = ApprovalEntry::ledger_key(subject_id, role);
        match self.approvals.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(from_cbor(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn calculation(&self, request_id: &str, kind: &str) -> Result<Option<ComputedArtifact>> {
        let key = ComputedArtifact::storage_key(request_id, kind);
        match self.artifacts.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(from_cbor(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn change_request(&self, id: &str) -> Result<ChangeRequest> {
        match self.change_requests.get(id.as_bytes())? {
            Some(bytes) => from_cbor(&bytes),
            None => Err(Error::NotFound {
                entity: "change_request",
                id: id.to_string(),
            }),
        }
    }

    pub fn signature(&self, document_id: &str, role: Role) -> Result<Option<Signature>> {
        let key = Signature::slot_key(document_id, role);
        match self.signatures.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(from_cbor(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Sample ids sharing a request, in insertion order.
    pub fn request_samples(&self, request_id: &str) -> Result<Vec<String>> {
        let prefix = format!("{request_id}/");
        let mut ids = Vec::new();
        for entry in self.request_index.scan_prefix(prefix.as_bytes()) {
            let (_, value) = entry?;
            ids.push(String::from_utf8_lossy(&value).to_string());
        }
        Ok(ids)
    }

    // ---- submission and lifecycle ----------------------------------------

    /// Create a client-private draft. Staff cannot see or act on it until
    /// the client submits.
    pub fn create_draft(
        &self,
        client: &Actor,
        group: WorkflowGroup,
        request_id: Option<&str>,
    ) -> Result<Sample> {
        client.require_role(Role::Client, "create a sample draft")?;
        let id = new_id("smpl")?;
        let request_id = match request_id {
            Some(r) => r.to_string(),
            None => new_id("req")?,
        };
        let sample = Sample::new_draft(id.clone(), request_id.clone(), client.id.clone(), group);
        let bytes = to_cbor(&sample)?;

        (&self.samples, &self.request_index)
            .transaction(|(samples, request_index)| {
                samples.insert(id.as_bytes(), bytes.clone())?;
                let key = format!("{request_id}/{id}");
                request_index.insert(key.as_bytes(), id.as_bytes())?;
                Ok(())
            })
            .map_err(Error::from)?;

        self.emit(
            AuditEvent::new("sample.create_draft", &client.id, "sample", &id)
                .new_value("status", "Draft")
                .new_value("request_id", &request_id),
        );
        Ok(sample)
    }

    /// Role-gated lifecycle transition with idempotent repeats.
    fn apply_transition(
        &self,
        sample_id: &str,
        target: RequestStatus,
        actor: &Actor,
        note: Option<&str>,
        action: &str,
    ) -> Result<Sample> {
        let (old_status, sample) = self
            .samples
            .transaction(|samples| {
                let mut sample: Sample = tx_get(samples, sample_id, "sample")?;
                let old_status = sample.status;
                if actor.role == Role::Client && actor.id != sample.client_id {
                    return Err(tx_err(Error::unauthorized(
                        Role::Client,
                        "act on another client's sample",
                    )));
                }
                if sample.status == target {
                    // a retry writes nothing, but it is only tolerated from
                    // an actor who could have made the transition at all
                    if !lifecycle::may_request(target, actor.role) {
                        return Err(tx_err(Error::unauthorized(
                            actor.role,
                            format!("transition to {target:?}"),
                        )));
                    }
                    return Ok((old_status, sample));
                }
                sample.status =
                    lifecycle::apply(sample.status, target, actor.role, note).map_err(tx_err)?;
                if let Some(n) = note {
                    sample.return_note = Some(n.to_string());
                }
                tx_put(samples, sample_id, &sample)?;
                Ok((old_status, sample))
            })
            .map_err(Error::from)?;

        if old_status != sample.status {
            self.emit(
                AuditEvent::new(action, &actor.id, "sample", sample_id)
                    .old("status", format!("{old_status:?}"))
                    .new_value("status", format!("{:?}", sample.status)),
            );
        }
        Ok(sample)
    }

    pub fn submit_request(&self, sample_id: &str, client: &Actor) -> Result<Sample> {
        self.apply_transition(
            sample_id,
            RequestStatus::Submitted,
            client,
            None,
            "sample.submit",
        )
    }

    pub fn accept_request(&self, sample_id: &str, actor: &Actor) -> Result<Sample> {
        self.apply_transition(
            sample_id,
            RequestStatus::ReadyForDelivery,
            actor,
            None,
            "sample.accept",
        )
    }

    /// The note is mandatory: it is the only audit trail for why work stalled.
    pub fn return_request(&self, sample_id: &str, note: &str, actor: &Actor) -> Result<Sample> {
        self.apply_transition(
            sample_id,
            RequestStatus::Returned,
            actor,
            Some(note),
            "sample.return",
        )
    }

    pub fn acknowledge_return(&self, sample_id: &str, client: &Actor) -> Result<Sample> {
        self.apply_transition(
            sample_id,
            RequestStatus::NeedsRevision,
            client,
            None,
            "sample.acknowledge_return",
        )
    }

    pub fn resubmit_request(&self, sample_id: &str, client: &Actor) -> Result<Sample> {
        self.apply_transition(
            sample_id,
            RequestStatus::Submitted,
            client,
            None,
            "sample.resubmit",
        )
    }

    pub fn mark_physically_received(&self, sample_id: &str, actor: &Actor) -> Result<Sample> {
        self.apply_transition(
            sample_id,
            RequestStatus::PhysicallyReceived,
            actor,
            None,
            "sample.physically_received",
        )
    }

    pub fn begin_inspection(&self, sample_id: &str, actor: &Actor) -> Result<Sample> {
        self.apply_transition(
            sample_id,
            RequestStatus::UnderInspection,
            actor,
            None,
            "sample.begin_inspection",
        )
    }

    pub fn fail_inspection(&self, sample_id: &str, note: &str, actor: &Actor) -> Result<Sample> {
        self.apply_transition(
            sample_id,
            RequestStatus::InspectionFailed,
            actor,
            Some(note),
            "sample.fail_inspection",
        )
    }

    pub fn request_verification(&self, sample_id: &str, actor: &Actor) -> Result<Sample> {
        self.apply_transition(
            sample_id,
            RequestStatus::AwaitingVerification,
            actor,
            None,
            "sample.request_verification",
        )
    }

    pub fn return_to_admin(&self, sample_id: &str, actor: &Actor) -> Result<Sample> {
        self.apply_transition(
            sample_id,
            RequestStatus::ReturnedToAdmin,
            actor,
            None,
            "sample.return_to_admin",
        )
    }

    // ---- custody ---------------------------------------------------------

    /// Record a physical hand-off. Idempotent on repeat; ordered by the
    /// custody chain; the first event mirrors into the lifecycle machine.
    pub fn record_custody_event(
        &self,
        sample_id: &str,
        step: CustodyStep,
        actor: &Actor,
    ) -> Result<(Sample, CustodyOutcome)> {
        let required = step.recording_role();
        if actor.role != required {
            return Err(Error::unauthorized(
                actor.role,
                format!("record custody event {}", step.name()),
            ));
        }

        let (sample, outcome) = self
            .samples
            .transaction(|samples| {
                let mut sample: Sample = tx_get(samples, sample_id, "sample")?;
                let outcome = sample
                    .custody
                    .record(step, TimeStamp::new())
                    .map_err(tx_err)?;
                if outcome == CustodyOutcome::AlreadyRecorded {
                    return Ok((sample, outcome));
                }
                if step == CustodyStep::AdminReceivedFromClient {
                    // both machines describe the same milestone
                    sample.status = lifecycle::apply(
                        sample.status,
                        RequestStatus::PhysicallyReceived,
                        actor.role,
                        None,
                    )
                    .map_err(tx_err)?;
                }
                tx_put(samples, sample_id, &sample)?;
                Ok((sample, outcome))
            })
            .map_err(Error::from)?;

        if outcome == CustodyOutcome::Recorded {
            self.emit(
                AuditEvent::new(
                    format!("custody.{}", step.name()),
                    &actor.id,
                    "sample",
                    sample_id,
                )
                .new_value(step.name(), "recorded"),
            );
        }
        Ok((sample, outcome))
    }

    // ---- intake ----------------------------------------------------------

    /// Submit the inspection checklist. All-pass promotes the sample and
    /// assigns its lab code in the same transaction, so a failed checklist
    /// can never consume an ordinal.
    pub fn submit_intake_checklist(
        &self,
        checklist: IntakeChecklist,
        actor: &Actor,
    ) -> Result<Sample> {
        actor.require_role(Role::Collector, "submit an intake checklist")?;
        // item-by-item validation happens before any row is written
        checklist.validate()?;
        let sample_id = checklist.sample_id.clone();
        let passed = checklist.is_passed();

        let (old_status, sample) = (&self.samples, &self.checklists, &self.sequences)
            .transaction(|(samples, checklists, sequences)| {
                let mut sample: Sample = tx_get(samples, &sample_id, "sample")?;
                if checklists.get(sample_id.as_bytes())?.is_some() {
                    return Err(tx_err(Error::conflict(format!(
                        "intake checklist for {sample_id} was already submitted"
                    ))));
                }
                if sample.status != RequestStatus::UnderInspection {
                    return Err(tx_err(Error::precondition(format!(
                        "sample {sample_id} is {:?}, not under inspection",
                        sample.status
                    ))));
                }
                let old_status = sample.status;
                if passed {
                    sample.status = RequestStatus::IntakeChecklistPassed;
                    if sample.lab_code.is_none() {
                        let name = self.config.sequence_name(sample.workflow_group);
                        let ordinal = sequence::allocate_in_tx(sequences, name)?;
                        let prefix = self.config.code_prefix(sample.workflow_group);
                        sample
                            .assign_lab_code(sequence::format_code(prefix, ordinal))
                            .map_err(tx_err)?;
                    }
                    sample.status = RequestStatus::IntakeValidated;
                } else {
                    sample.status = RequestStatus::Rejected;
                }
                let mut stored = checklist.clone();
                stored.inspector_id = actor.id.clone();
                tx_put(checklists, &sample_id, &stored)?;
                tx_put(samples, &sample_id, &sample)?;
                Ok((old_status, sample))
            })
            .map_err(Error::from)?;

        tracing::debug!(sample = %sample_id, status = ?sample.status, "intake checklist applied");
        let mut event = AuditEvent::new("sample.intake_checklist", &actor.id, "sample", &sample_id)
            .old("status", format!("{old_status:?}"))
            .new_value("status", format!("{:?}", sample.status));
        if let Some(code) = &sample.lab_code {
            event = event.new_value("lab_code", code);
        }
        self.emit(event);
        Ok(sample)
    }

    /// Record the QC crosscheck outcome feeding the calculation gate.
    pub fn record_crosscheck(
        &self,
        sample_id: &str,
        passed: bool,
        note: Option<&str>,
        actor: &Actor,
    ) -> Result<Sample> {
        actor.require_role(Role::Collector, "record a crosscheck result")?;
        let sample = self
            .samples
            .transaction(|samples| {
                let mut sample: Sample = tx_get(samples, sample_id, "sample")?;
                if sample.lab_code.is_none() {
                    return Err(tx_err(Error::precondition(format!(
                        "sample {sample_id} has not passed intake validation"
                    ))));
                }
                sample.crosscheck = if passed {
                    CrosscheckStatus::Passed
                } else {
                    CrosscheckStatus::Failed
                };
                sample.crosscheck_note = note.map(str::to_string);
                tx_put(samples, sample_id, &sample)?;
                Ok(sample)
            })
            .map_err(Error::from)?;

        self.emit(
            AuditEvent::new("sample.crosscheck", &actor.id, "sample", sample_id)
                .new_value("crosscheck", format!("{:?}", sample.crosscheck)),
        );
        Ok(sample)
    }

    // ---- verification and approvals --------------------------------------

    /// Upsert one role's approval flag. An actor may only flip their own
    /// role's slot; clearing nulls the timestamp but keeps the row.
    pub fn set_approval(
        &self,
        subject_id: &str,
        role: Role,
        approved: bool,
        actor: &Actor,
    ) -> Result<ApprovalEntry> {
        if !role.is_verifier() {
            return Err(Error::validation(format!(
                "role {} holds no approval slot",
                role.code()
            )));
        }
        actor.require_role(role, &format!("set the {} approval", role.code()))?;

        let entry = self
            .approvals
            .transaction(|approvals| {
                let key = ApprovalEntry::ledger_key(subject_id, role);
                let entry = if approved {
                    ApprovalEntry::approve(subject_id, role, &actor.id)
                } else {
                    match approvals.get(key.as_bytes())? {
                        Some(bytes) => from_cbor::<ApprovalEntry>(&bytes)
                            .map_err(tx_err)?
                            .clear(&actor.id),
                        None => ApprovalEntry {
                            subject_id: subject_id.to_string(),
                            role,
                            approver_id: None,
                            approved_at: None,
                            updated_by: actor.id.clone(),
                        },
                    }
                };
                tx_put(approvals, &key, &entry)?;
                Ok(entry)
            })
            .map_err(Error::from)?;

        self.emit(
            AuditEvent::new("approval.set", &actor.id, "approval", subject_id)
                .new_value("role", role.code())
                .new_value("approved", approved.to_string()),
        );
        Ok(entry)
    }

    /// Ready iff every required role carries a non-null approval timestamp.
    pub fn is_ready(&self, subject_id: &str) -> Result<bool> {
        let mut entries = Vec::new();
        for role in &self.config.required_approval_roles {
            if let Some(entry) = self.approval(subject_id, *role)? {
                entries.push(entry);
            }
        }
        Ok(approval::is_ready(
            entries.iter(),
            &self.config.required_approval_roles,
        ))
    }

    /// Record the caller's verification approval; whoever completes the
    /// required set writes the sample's one-time verification record.
    pub fn verify_sample(&self, sample_id: &str, actor: &Actor) -> Result<Sample> {
        if !actor.role.is_verifier() {
            return Err(Error::unauthorized(actor.role, "verify a sample"));
        }
        let required = self.config.required_approval_roles.clone();

        let sample = (&self.samples, &self.approvals)
            .transaction(|(samples, approvals)| {
                let mut sample: Sample = tx_get(samples, sample_id, "sample")?;
                if sample.verification.is_some() {
                    return Err(tx_err(Error::conflict(format!(
                        "sample {sample_id} is already verified"
                    ))));
                }
                if sample.status != RequestStatus::AwaitingVerification {
                    return Err(tx_err(Error::precondition(format!(
                        "sample {sample_id} is {:?}, not awaiting verification",
                        sample.status
                    ))));
                }
                let entry = ApprovalEntry::approve(sample_id, actor.role, &actor.id);
                tx_put(
                    approvals,
                    &ApprovalEntry::ledger_key(sample_id, actor.role),
                    &entry,
                )?;

                let mut entries = Vec::new();
                for role in &required {
                    let key = ApprovalEntry::ledger_key(sample_id, *role);
                    if let Some(bytes) = approvals.get(key.as_bytes())? {
                        entries.push(from_cbor::<ApprovalEntry>(&bytes).map_err(tx_err)?);
                    }
                }
                if approval::is_ready(entries.iter(), &required) {
                    sample
                        .set_verification(VerificationRecord {
                            verifier_id: actor.id.clone(),
                            verifier_role: actor.role,
                            verified_at: TimeStamp::new(),
                        })
                        .map_err(tx_err)?;
                }
                tx_put(samples, sample_id, &sample)?;
                Ok(sample)
            })
            .map_err(Error::from)?;

        self.emit(
            AuditEvent::new("sample.verify", &actor.id, "sample", sample_id)
                .new_value("role", actor.role.code())
                .new_value("verified", sample.verification.is_some().to_string()),
        );
        Ok(sample)
    }

    // ---- letters of order -------------------------------------------------

    /// Generate letters for every ready candidate; unready ids are reported,
    /// never failed over.
    pub fn generate_letters(&self, sample_ids: &[String], actor: &Actor) -> Result<BulkOutcome> {
        actor.require_role(Role::Administrator, "generate letters of order")?;
        let mut outcome = BulkOutcome::default();
        for sample_id in sample_ids {
            // unknown ids are a caller error, not an exclusion
            self.sample(sample_id)?;
            if !self.is_ready(sample_id)? {
                outcome.excluded_not_ready.push(sample_id.clone());
                continue;
            }
            let doc = self.letter_for(sample_id, actor)?;
            outcome.generated.push(GeneratedLetter {
                sample_id: sample_id.clone(),
                document_id: doc.id.clone(),
                document_hash: doc.document_hash.clone().unwrap_or_default(),
            });
        }
        Ok(outcome)
    }

    fn letter_for(&self, sample_id: &str, actor: &Actor) -> Result<Document> {
        if let Some(doc) = self.existing_letter(sample_id)? {
            return Ok(doc);
        }
        match self.create_letter(sample_id, actor) {
            Ok(doc) => Ok(doc),
            // lost a race: another caller reserved the letter first
            Err(e) if e.is_conflict() => self
                .existing_letter(sample_id)?
                .ok_or(e),
            Err(e) => Err(e),
        }
    }

    /// A second generation request short-circuits to the locked artifact
    /// after re-verifying its stored hash against its stored bytes. No new
    /// blob write happens on this path.
    fn existing_letter(&self, sample_id: &str) -> Result<Option<Document>> {
        let Some(raw) = self.letters.get(sample_id.as_bytes())? else {
            return Ok(None);
        };
        let doc_id = String::from_utf8_lossy(&raw).to_string();
        let doc = self.document(&doc_id)?;
        if doc.locked {
            self.verified_bytes(&doc)?;
            Ok(Some(doc))
        } else {
            // an earlier attempt reserved the letter but crashed before
            // locking; finish the job
            Ok(Some(self.finalize_document(&doc_id)?))
        }
    }

    fn create_letter(&self, sample_id: &str, actor: &Actor) -> Result<Document> {
        let doc_id = new_id("doc")?;
        let doc = Document::new(
            doc_id.clone(),
            DocumentKind::LetterOfOrder,
            vec![sample_id.to_string()],
            "letter_of_order_v1".to_string(),
        );
        let bytes = to_cbor(&doc)?;

        (&self.documents, &self.letters)
            .transaction(|(documents, letters)| {
                if letters.get(sample_id.as_bytes())?.is_some() {
                    return Err(tx_err(Error::conflict(format!(
                        "letter of order for {sample_id} already exists"
                    ))));
                }
                documents.insert(doc_id.as_bytes(), bytes.clone())?;
                letters.insert(sample_id.as_bytes(), doc_id.as_bytes())?;
                Ok(())
            })
            .map_err(Error::from)?;

        self.emit(
            AuditEvent::new("document.create", &actor.id, "document", &doc_id)
                .new_value("kind", doc.kind.slug())
                .new_value("subject", sample_id),
        );
        self.finalize_document(&doc_id)
    }

    // ---- reports and signatures ------------------------------------------

    /// Open an unlocked report over a request's samples. Every subject must
    /// already be verified.
    pub fn create_report(&self, request_id: &str, template: &str, actor: &Actor) -> Result<Document> {
        actor.require_role(Role::Administrator, "create a report")?;
        let sample_ids = self.request_samples(request_id)?;
        if sample_ids.is_empty() {
            return Err(Error::NotFound {
                entity: "request",
                id: request_id.to_string(),
            });
        }
        let mut unverified = Vec::new();
        for id in &sample_ids {
            if self.sample(id)?.verification.is_none() {
                unverified.push(id.clone());
            }
        }
        if !unverified.is_empty() {
            return Err(Error::precondition(format!(
                "samples not yet verified: {unverified:?}"
            )));
        }

        let doc_id = new_id("doc")?;
        let doc = Document::new(
            doc_id.clone(),
            DocumentKind::Report,
            sample_ids,
            template.to_string(),
        );
        self.documents.insert(doc_id.as_bytes(), to_cbor(&doc)?)?;

        self.emit(
            AuditEvent::new("document.create", &actor.id, "document", &doc_id)
                .new_value("kind", doc.kind.slug())
                .new_value("request_id", request_id),
        );
        Ok(doc)
    }

    /// Sign one role slot. The signature completing the required set
    /// finalizes the document; the closing role's slot is part of that set,
    /// so nothing locks without the closing act.
    pub fn sign_document(&self, document_id: &str, role: Role, actor: &Actor) -> Result<Document> {
        actor.require_role(role, &format!("sign the {} slot", role.code()))?;
        if !self.config.report_signature_roles.contains(&role) {
            return Err(Error::validation(format!(
                "role {} holds no signature slot",
                role.code()
            )));
        }
        let required = self.config.report_signature_roles.clone();

        // a crash between the closing signature and the lock leaves a report
        // fully signed but unlocked; finish that lock before judging the
        // retry, so the caller sees the lock conflict instead of a limbo doc
        self.finalize_if_fully_signed(document_id)?;

        let (doc, fully_signed) = (&self.documents, &self.signatures)
            .transaction(|(documents, signatures)| {
                let doc: Document = tx_get(documents, document_id, "document")?;
                if doc.kind != DocumentKind::Report {
                    return Err(tx_err(Error::validation(
                        "only reports carry signature slots",
                    )));
                }
                if doc.locked {
                    return Err(tx_err(Error::conflict(format!(
                        "document {document_id} is already locked"
                    ))));
                }
                let key = Signature::slot_key(document_id, role);
                if signatures.get(key.as_bytes())?.is_some() {
                    return Err(tx_err(Error::conflict(format!(
                        "slot {} of document {document_id} is already signed",
                        role.code()
                    ))));
                }
                let signature = Signature::sign(&doc, role, &actor.id).map_err(tx_err)?;
                tx_put(signatures, &key, &signature)?;

                let mut fully_signed = true;
                for r in &required {
                    let slot = Signature::slot_key(document_id, *r);
                    if signatures.get(slot.as_bytes())?.is_none() {
                        fully_signed = false;
                    }
                }
                Ok((doc, fully_signed))
            })
            .map_err(Error::from)?;

        self.emit(
            AuditEvent::new("document.sign", &actor.id, "document", document_id)
                .new_value("role", role.code()),
        );

        // the closing role's slot is the closing act; without it the
        // document stays open even if every other slot is signed
        if fully_signed && self.signature(document_id, self.config.closing_role)?.is_some() {
            return self.finalize_document(document_id);
        }
        Ok(doc)
    }

    /// Recovery for the window between the last signature and the lock: if
    /// every required slot including the closing one is signed but the
    /// report is still unlocked, finish the lock now. Returns the locked
    /// document, or None when there is nothing to repair.
    fn finalize_if_fully_signed(&self, document_id: &str) -> Result<Option<Document>> {
        let doc = self.document(document_id)?;
        if doc.locked || doc.kind != DocumentKind::Report {
            return Ok(None);
        }
        for role in &self.config.report_signature_roles {
            if self.signature(document_id, *role)?.is_none() {
                return Ok(None);
            }
        }
        if self.signature(document_id, self.config.closing_role)?.is_none() {
            return Ok(None);
        }
        match self.finalize_document(document_id) {
            Ok(locked) => Ok(Some(locked)),
            // lost the race to a concurrent repair; the lock is in place
            Err(e) if e.is_conflict() => Ok(Some(self.document(document_id)?)),
            Err(e) => Err(e),
        }
    }

    /// Two-phase generation: render draft bytes without the verification
    /// marker, hash them, re-render with the hash-derived marker, store, and
    /// atomically record path + hashes + lock. Runs exactly once per
    /// document; a locked document conflicts here.
    fn finalize_document(&self, document_id: &str) -> Result<Document> {
        let doc = self.document(document_id)?;
        if doc.locked {
            return Err(Error::conflict(format!(
                "document {document_id} is already locked"
            )));
        }

        let payload = doc.canonical_payload()?;
        let draft = self.renderer.render(&doc.template, &payload, None)?;
        let verify_code = sha256::digest(&draft);
        let marker = format!("verify/{verify_code}");
        let final_bytes = self.renderer.render(&doc.template, &payload, Some(&marker))?;
        let document_hash = sha256::digest(&final_bytes);
        let path = format!("documents/{}/{document_hash}", doc.kind.slug());

        // content-addressed, so a crashed earlier attempt left identical bytes
        self.blobs.store(&path, &final_bytes)?;

        let locked = (&self.documents, &self.hash_index)
            .transaction(|(documents, hash_index)| {
                let mut doc: Document = tx_get(documents, document_id, "document")?;
                if doc.locked {
                    return Err(tx_err(Error::conflict(format!(
                        "document {document_id} is already locked"
                    ))));
                }
                doc.path = Some(path.clone());
                doc.document_hash = Some(document_hash.clone());
                doc.verify_code = Some(verify_code.clone());
                doc.locked = true;
                doc.finalized_at = Some(TimeStamp::new());
                tx_put(documents, document_id, &doc)?;
                hash_index.insert(verify_code.as_bytes(), document_id.as_bytes())?;
                hash_index.insert(document_hash.as_bytes(), document_id.as_bytes())?;
                Ok(doc)
            })
            .map_err(Error::from)?;

        tracing::debug!(document = %document_id, hash = %document_hash, "document locked");
        self.emit(
            AuditEvent::new("document.finalize", "system", "document", document_id)
                .new_value("document_hash", &document_hash)
                .new_value("verify_code", &verify_code)
                .new_value("locked", "true"),
        );
        Ok(locked)
    }

    fn verified_bytes(&self, doc: &Document) -> Result<Vec<u8>> {
        let (path, hash) = match (&doc.path, &doc.document_hash) {
            (Some(path), Some(hash)) => (path, hash),
            _ => {
                return Err(Error::precondition(format!(
                    "document {} has not been finalized",
                    doc.id
                )));
            }
        };
        let bytes = self.blobs.get(path)?;
        if sha256::digest(&bytes) != *hash {
            return Err(Error::Integrity {
                entity: "document",
                id: doc.id.clone(),
            });
        }
        Ok(bytes)
    }

    /// Serve a locked document's bytes, re-verifying the stored hash on
    /// every read. Mismatches fail closed.
    pub fn document_bytes(&self, document_id: &str) -> Result<Vec<u8>> {
        let mut doc = self.document(document_id)?;
        if !doc.locked {
            // a fully signed report stranded unlocked by an interrupted
            // finalization is repaired on first read
            match self.finalize_if_fully_signed(document_id)? {
                Some(repaired) => doc = repaired,
                None => {
                    return Err(Error::precondition(format!(
                        "document {document_id} has not been finalized"
                    )));
                }
            }
        }
        self.verified_bytes(&doc)
    }

    /// Public, unauthenticated hash lookup. Succeeds only for locked
    /// documents; drafts and unknown hashes are indistinguishable.
    pub fn verify_hash(&self, code: &str) -> Result<Verification> {
        if code.len() != 64 || hex::decode(code).is_err() {
            return Ok(Verification::invalid());
        }
        let Some(raw) = self.hash_index.get(code.as_bytes())? else {
            return Ok(Verification::invalid());
        };
        let doc_id = String::from_utf8_lossy(&raw).to_string();
        let doc = match self.document(&doc_id) {
            Ok(doc) => doc,
            Err(Error::NotFound { .. }) => return Ok(Verification::invalid()),
            Err(e) => return Err(e),
        };
        if !doc.locked {
            return Ok(Verification::invalid());
        }
        // read-time tamper detection, even on the public path
        self.verified_bytes(&doc)?;
        Ok(Verification {
            valid: true,
            summary: Some(DocumentSummary {
                document_id: doc.id.clone(),
                kind: doc.kind,
                subject_ids: doc.subject_ids.clone(),
                document_hash: doc.document_hash.clone().unwrap_or_default(),
                verify_code: doc.verify_code.clone().unwrap_or_default(),
            }),
        })
    }

    // ---- computed artifacts ----------------------------------------------

    fn crosscheck_gate(
        &self,
        samples: &TransactionalTree,
        sample_ids: &[String],
    ) -> TxResult<()> {
        let mut blocked = Vec::new();
        for id in sample_ids {
            let sample: Sample = tx_get(samples, id, "sample")?;
            if sample.crosscheck != CrosscheckStatus::Passed {
                blocked.push(id.clone());
            }
        }
        if blocked.is_empty() {
            Ok(())
        } else {
            Err(tx_err(Error::CrosscheckBlocked(blocked)))
        }
    }

    /// Store a pending calculation edit. Gated on every sample in the
    /// request group having a passed crosscheck; fails closed listing the
    /// blockers.
    pub fn propose_calculation(
        &self,
        request_id: &str,
        kind: &str,
        data: Vec<u8>,
        actor: &Actor,
    ) -> Result<ComputedArtifact> {
        actor.require_role(Role::Collector, "propose a calculation")?;
        let sample_ids = self.request_samples(request_id)?;
        if sample_ids.is_empty() {
            return Err(Error::NotFound {
                entity: "request",
                id: request_id.to_string(),
            });
        }

        let artifact = (&self.artifacts, &self.samples)
            .transaction(|(artifacts, samples)| {
                self.crosscheck_gate(samples, &sample_ids)?;
                let key = ComputedArtifact::storage_key(request_id, kind);
                let mut artifact: ComputedArtifact = match artifacts.get(key.as_bytes())? {
                    Some(bytes) => from_cbor(&bytes).map_err(tx_err)?,
                    None => ComputedArtifact::new(
                        key.clone(),
                        request_id.to_string(),
                        kind.to_string(),
                    ),
                };
                artifact.propose(data.clone()).map_err(tx_err)?;
                tx_put(artifacts, &key, &artifact)?;
                Ok(artifact)
            })
            .map_err(Error::from)?;

        self.emit(
            AuditEvent::new("artifact.propose", &actor.id, "artifact", &artifact.id)
                .new_value("version_no", artifact.version_no.to_string()),
        );
        Ok(artifact)
    }

    /// Decide the pending proposal. Same crosscheck gate as propose; every
    /// decision is a versioned event.
    pub fn decide_calculation(
        &self,
        request_id: &str,
        kind: &str,
        approve: bool,
        actor: &Actor,
    ) -> Result<ComputedArtifact> {
        actor.require_role(Role::LaboratoryHead, "decide a calculation proposal")?;
        let sample_ids = self.request_samples(request_id)?;
        let key = ComputedArtifact::storage_key(request_id, kind);

        let artifact = (&self.artifacts, &self.samples)
            .transaction(|(artifacts, samples)| {
                self.crosscheck_gate(samples, &sample_ids)?;
                let mut artifact: ComputedArtifact = tx_get(artifacts, &key, "artifact")?;
                artifact.decide(approve, &actor.id).map_err(tx_err)?;
                tx_put(artifacts, &key, &artifact)?;
                Ok(artifact)
            })
            .map_err(Error::from)?;

        self.emit(
            AuditEvent::new("artifact.decide", &actor.id, "artifact", &artifact.id)
                .new_value("approved", approve.to_string())
                .new_value("version_no", artifact.version_no.to_string())
                .new_value("locked", artifact.locked.to_string()),
        );
        Ok(artifact)
    }

    // ---- lab-code change requests ----------------------------------------

    pub fn request_code_change(
        &self,
        sample_id: &str,
        proposed_code: &str,
        actor: &Actor,
    ) -> Result<ChangeRequest> {
        actor.require_role(Role::Administrator, "request a lab-code change")?;
        if proposed_code.trim().is_empty() {
            return Err(Error::validation("proposed lab code must not be empty"));
        }
        let sample = self.sample(sample_id)?;
        let Some(current_code) = sample.lab_code else {
            return Err(Error::precondition(format!(
                "sample {sample_id} has no lab code to change"
            )));
        };
        if current_code == proposed_code {
            return Err(Error::validation(
                "proposed lab code equals the current code",
            ));
        }

        let cr = ChangeRequest::new(
            new_id("chg")?,
            sample_id.to_string(),
            current_code,
            proposed_code.to_string(),
            actor.id.clone(),
        );
        self.change_requests
            .insert(cr.id.as_bytes(), to_cbor(&cr)?)?;

        self.emit(
            AuditEvent::new("change_request.create", &actor.id, "change_request", &cr.id)
                .new_value("sample_id", sample_id)
                .new_value("proposed_code", proposed_code),
        );
        Ok(cr)
    }

    /// Review a pending change request. Approval swaps the sample's lab code
    /// in the same transaction, the one sanctioned correction path for an
    /// issued identifier.
    pub fn review_code_change(
        &self,
        change_id: &str,
        approve: bool,
        note: &str,
        actor: &Actor,
    ) -> Result<ChangeRequest> {
        actor.require_role(Role::Administrator, "review a lab-code change")?;

        let cr = (&self.change_requests, &self.samples)
            .transaction(|(change_requests, samples)| {
                let mut cr: ChangeRequest = tx_get(change_requests, change_id, "change_request")?;
                cr.review(approve, &actor.id, note).map_err(tx_err)?;
                if approve {
                    let mut sample: Sample = tx_get(samples, &cr.sample_id, "sample")?;
                    if sample.lab_code.as_deref() != Some(cr.current_code.as_str()) {
                        return Err(tx_err(Error::conflict(format!(
                            "lab code of sample {} changed since the request was filed",
                            cr.sample_id
                        ))));
                    }
                    sample.lab_code = Some(cr.proposed_code.clone());
                    tx_put(samples, &cr.sample_id, &sample)?;
                }
                tx_put(change_requests, change_id, &cr)?;
                Ok(cr)
            })
            .map_err(Error::from)?;

        let mut event = AuditEvent::new(
            "change_request.review",
            &actor.id,
            "change_request",
            change_id,
        )
        .new_value("state", format!("{:?}", cr.state));
        if approve {
            event = event
                .old("lab_code", &cr.current_code)
                .new_value("lab_code", &cr.proposed_code);
        }
        self.emit(event);
        Ok(cr)
    }

    // ---- audit -----------------------------------------------------------

    /// Emitted audit events in emit order, for inspection and tests.
    pub fn audit_events(&self) -> Result<Vec<AuditEvent>> {
        let mut out = Vec::new();
        for entry in self.audit_tree.iter() {
            let (_, value) = entry?;
            out.push(from_cbor(&value)?);
        }
        Ok(out)
    }
}
