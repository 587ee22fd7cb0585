//! Typed inventory operations on top of the discovered tab layout.

use chrono::{DateTime, Utc};
use shelfscan_models::{InventoryRecord, ItemId, RemovalLedgerEntry, SynonymEntry};
use tracing::{debug, info, warn};

use crate::client::SheetsClient;
use crate::error::{SheetsError, SheetsResult};
use crate::schema::{ColumnMap, InventoryField, LedgerField, SemanticField, SynonymField};
use crate::types::{a1_range, cell_ref, column_letter, SheetRequest, SpreadsheetMetadata, ValueRange};

/// Event written on rows created from camera detections.
pub const DETECTION_EVENT: &str = "detection";

/// Timestamp format used in every tab.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// One tab and its resolved columns.
#[derive(Debug, Clone)]
pub struct TabLayout<F: SemanticField> {
    pub title: String,
    pub sheet_id: i64,
    pub columns: ColumnMap<F>,
}

impl<F: SemanticField> TabLayout<F> {
    /// Range spanning every header column, e.g. `'Bitacora'!A:I`.
    fn full_range(&self) -> String {
        let last = column_letter(self.columns.width().max(1) - 1);
        a1_range(&self.title, &format!("A:{}", last))
    }

    fn column_range(&self, column: usize) -> String {
        let letter = column_letter(column);
        a1_range(&self.title, &format!("{}:{}", letter, letter))
    }
}

/// The inventory, removal-ledger and synonyms tabs of one spreadsheet.
#[derive(Clone)]
pub struct InventorySheets {
    client: SheetsClient,
    inventory: TabLayout<InventoryField>,
    ledger: TabLayout<LedgerField>,
    synonyms: TabLayout<SynonymField>,
}

impl InventorySheets {
    /// Discover the tab layout, creating the ledger and synonyms tabs if absent.
    ///
    /// Fails with [`SheetsError::Schema`] when no tab has a header row that
    /// maps both an item identifier and a quantity column.
    pub async fn connect(client: SheetsClient) -> SheetsResult<Self> {
        let metadata = client.spreadsheet_metadata().await?;
        let tabs = client.tabs().clone();

        let inventory = Self::discover_inventory(&client, &metadata).await?;
        info!(
            tab = %inventory.title,
            columns = inventory.columns.width(),
            "Discovered inventory tab"
        );

        let ledger = Self::ensure_tab::<LedgerField>(&client, &metadata, &tabs.ledger).await?;
        let synonyms = Self::ensure_tab::<SynonymField>(&client, &metadata, &tabs.synonyms).await?;

        Ok(Self {
            client,
            inventory,
            ledger,
            synonyms,
        })
    }

    pub fn inventory_layout(&self) -> &TabLayout<InventoryField> {
        &self.inventory
    }

    async fn read_headers(client: &SheetsClient, title: &str) -> SheetsResult<Vec<String>> {
        let rows = client.get_values(&a1_range(title, "1:1")).await?;
        Ok(rows.into_iter().next().unwrap_or_default())
    }

    async fn discover_inventory(
        client: &SheetsClient,
        metadata: &SpreadsheetMetadata,
    ) -> SheetsResult<TabLayout<InventoryField>> {
        let tabs = client.tabs();
        let required = [InventoryField::ItemId, InventoryField::Quantity];

        // Configured tab first, then any other tab with a header row.
        let mut candidates: Vec<_> = metadata
            .sheets
            .iter()
            .map(|s| &s.properties)
            .filter(|p| p.title != tabs.ledger && p.title != tabs.synonyms)
            .collect();
        candidates.sort_by_key(|p| p.title != tabs.inventory);

        for props in candidates {
            let headers = Self::read_headers(client, &props.title).await?;
            if headers.iter().all(|h| h.trim().is_empty()) {
                debug!(tab = %props.title, "Skipping tab without header row");
                continue;
            }

            let columns = ColumnMap::<InventoryField>::discover(&headers);
            let missing = columns.missing(&required);
            if !missing.is_empty() {
                if props.title == tabs.inventory {
                    return Err(SheetsError::schema(format!(
                        "tab '{}' has no column for {:?}",
                        props.title, missing
                    )));
                }
                debug!(tab = %props.title, ?missing, "Tab lacks required columns");
                continue;
            }

            return Ok(TabLayout {
                title: props.title.clone(),
                sheet_id: props.sheet_id.unwrap_or(0),
                columns,
            });
        }

        Err(SheetsError::schema(format!(
            "no tab with item id and quantity headers (looked for '{}')",
            tabs.inventory
        )))
    }

    async fn ensure_tab<F: SemanticField>(
        client: &SheetsClient,
        metadata: &SpreadsheetMetadata,
        title: &str,
    ) -> SheetsResult<TabLayout<F>> {
        if let Some(props) = metadata.tab(title) {
            let headers = Self::read_headers(client, title).await?;
            let columns = ColumnMap::<F>::discover(&headers);
            if headers.iter().all(|h| h.trim().is_empty()) {
                // Existing tabs are never rewritten
                warn!(tab = %title, "Tab has no header row, its rows will not be written");
            } else if columns.is_empty() {
                warn!(tab = %title, "No recognised headers, rows will not be written");
            }
            return Ok(TabLayout {
                title: title.to_string(),
                sheet_id: props.sheet_id.unwrap_or(0),
                columns,
            });
        }

        let reply = client
            .batch_update(vec![SheetRequest::add_sheet(title)])
            .await?;
        info!(tab = %title, "Created tab");
        let sheet_id = reply
            .replies
            .into_iter()
            .find_map(|r| r.add_sheet)
            .and_then(|r| r.properties.sheet_id)
            .ok_or_else(|| {
                SheetsError::InvalidResponse(format!("addSheet reply for '{}' has no sheetId", title))
            })?;

        let headers: Vec<String> = F::canonical_headers().iter().map(|h| h.to_string()).collect();
        client
            .batch_update_values(vec![ValueRange::at(a1_range(title, "A1"), headers.clone())])
            .await?;

        Ok(TabLayout {
            title: title.to_string(),
            sheet_id,
            columns: ColumnMap::discover(&headers),
        })
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    /// Append a new inventory row.
    pub async fn append_item(&self, record: &InventoryRecord) -> SheetsResult<()> {
        let row = self.inventory.columns.build_row(&[
            (InventoryField::ItemId, record.item_id.to_string()),
            (InventoryField::Name, record.name.clone()),
            (InventoryField::Category, record.category.clone()),
            (InventoryField::Confidence, format!("{:.2}", record.confidence)),
            (InventoryField::Quantity, record.quantity.to_string()),
            (InventoryField::CreatedAt, format_timestamp(record.created_at)),
            (InventoryField::UpdatedAt, format_timestamp(record.updated_at)),
            (InventoryField::Source, record.source.clone()),
            (InventoryField::Event, DETECTION_EVENT.to_string()),
            (InventoryField::Note, record.note.clone()),
            (InventoryField::Location, record.location.clone()),
        ]);

        self.client
            .append_row(&a1_range(&self.inventory.title, "A1"), row)
            .await?;
        Ok(())
    }

    /// Item identifiers currently present in the inventory tab.
    pub async fn existing_item_ids(&self) -> SheetsResult<Vec<ItemId>> {
        let ids = self.id_column().await?;
        Ok(ids
            .into_iter()
            .filter(|id| !id.is_empty())
            .map(ItemId::from_string)
            .collect())
    }

    /// Identifier column, header excluded; index `i` is sheet row `i + 2`.
    async fn id_column(&self) -> SheetsResult<Vec<String>> {
        let column = self
            .inventory
            .columns
            .column(InventoryField::ItemId)
            .ok_or_else(|| SheetsError::schema("inventory tab lost its id column"))?;
        let rows = self
            .client
            .get_values(&self.inventory.column_range(column))
            .await?;
        Ok(rows
            .into_iter()
            .skip(1)
            .map(|row| row.into_iter().next().unwrap_or_default())
            .collect())
    }

    /// One-based sheet row holding `item_id`.
    async fn find_row(&self, item_id: &ItemId) -> SheetsResult<u32> {
        let ids = self.id_column().await?;
        ids.iter()
            .position(|id| id.trim() == item_id.as_str())
            .map(|index| index as u32 + 2)
            .ok_or_else(|| SheetsError::RowNotFound(item_id.to_string()))
    }

    /// Set the quantity, refresh the update time and append `note` to the
    /// existing note.
    pub async fn update_quantity(&self, item_id: &ItemId, quantity: u32, note: &str) -> SheetsResult<()> {
        let row = self.find_row(item_id).await?;
        let columns = &self.inventory.columns;
        let title = &self.inventory.title;

        let quantity_col = columns
            .column(InventoryField::Quantity)
            .ok_or_else(|| SheetsError::schema("inventory tab lost its quantity column"))?;

        let mut data = vec![ValueRange::at(
            cell_ref(title, quantity_col, row),
            vec![quantity.to_string()],
        )];

        if let Some(col) = columns.column(InventoryField::UpdatedAt) {
            data.push(ValueRange::at(
                cell_ref(title, col, row),
                vec![format_timestamp(Utc::now())],
            ));
        }

        if let (Some(col), false) = (columns.column(InventoryField::Note), note.is_empty()) {
            let cell = cell_ref(title, col, row);
            let existing = self
                .client
                .get_values(&cell)
                .await?
                .into_iter()
                .next()
                .and_then(|r| r.into_iter().next())
                .unwrap_or_default();
            let merged = if existing.trim().is_empty() {
                note.to_string()
            } else {
                format!("{}; {}", existing, note)
            };
            data.push(ValueRange::at(cell, vec![merged]));
        }

        self.client.batch_update_values(data).await
    }

    /// Delete the row holding `item_id`.
    pub async fn delete_item(&self, item_id: &ItemId) -> SheetsResult<()> {
        let row = self.find_row(item_id).await?;
        self.client
            .batch_update(vec![SheetRequest::delete_row(self.inventory.sheet_id, row - 1)])
            .await?;
        Ok(())
    }

    // =========================================================================
    // Ledger and synonyms
    // =========================================================================

    pub async fn append_ledger(&self, entry: &RemovalLedgerEntry) -> SheetsResult<()> {
        if self.ledger.columns.is_empty() {
            warn!(tab = %self.ledger.title, item_id = %entry.item_id, "Ledger tab has no usable headers, skipping row");
            return Ok(());
        }
        let row = self.ledger.columns.build_row(&[
            (LedgerField::Timestamp, format_timestamp(entry.timestamp)),
            (LedgerField::ItemId, entry.item_id.to_string()),
            (LedgerField::Name, entry.name.clone()),
            (LedgerField::DeltaQty, entry.delta_qty.to_string()),
            (LedgerField::NewQty, entry.new_qty.to_string()),
            (LedgerField::Event, entry.event.clone()),
            (LedgerField::Source, entry.source.clone()),
            (LedgerField::PayloadId, entry.payload_id.clone()),
            (LedgerField::Note, entry.note.clone()),
        ]);

        self.client
            .append_row(&a1_range(&self.ledger.title, "A1"), row)
            .await?;
        Ok(())
    }

    /// True if the synonyms tab already holds `term` for `item_id`.
    pub async fn synonym_exists(&self, term: &str, item_id: &ItemId) -> SheetsResult<bool> {
        let columns = &self.synonyms.columns;
        let rows = self.client.get_values(&self.synonyms.full_range()).await?;

        Ok(rows.iter().skip(1).any(|row| {
            let existing = SynonymEntry::new(
                columns.cell(row, SynonymField::Term).unwrap_or_default(),
                ItemId::from_string(columns.cell(row, SynonymField::ItemId).unwrap_or_default()),
                columns.cell(row, SynonymField::Category).unwrap_or_default(),
            );
            existing.same_pair(term, item_id)
        }))
    }

    pub async fn append_synonym(&self, entry: &SynonymEntry) -> SheetsResult<()> {
        if self.synonyms.columns.is_empty() {
            warn!(tab = %self.synonyms.title, term = %entry.term, "Synonyms tab has no usable headers, skipping row");
            return Ok(());
        }
        let row = self.synonyms.columns.build_row(&[
            (SynonymField::Term, entry.term.clone()),
            (SynonymField::ItemId, entry.item_id.to_string()),
            (SynonymField::Category, entry.category.clone()),
        ]);

        self.client
            .append_row(&a1_range(&self.synonyms.title, "A1"), row)
            .await?;
        Ok(())
    }
}
