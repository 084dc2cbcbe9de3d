//! Spreadsheet and PDF rendering of the full request list.

use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfLayerReference};
use rust_xlsxwriter::{Format, Workbook};

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const XLSX_FILENAME: &str = "rapport_requetes.xlsx";
pub const PDF_CONTENT_TYPE: &str = "application/pdf";
pub const PDF_FILENAME: &str = "rapport_requetes.pdf";

const SHEET_NAME: &str = "Requêtes";
const PDF_TITLE: &str = "Rapport des Requêtes Étudiantes";

const COLUMNS: [(&str, f64); 8] = [
    ("Référence", 20.0),
    ("Type", 40.0),
    ("Titre", 30.0),
    ("Statut", 20.0),
    ("Priorité", 15.0),
    ("Étudiant", 25.0),
    ("Agent assigné", 25.0),
    ("Date création", 20.0),
];

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 10.6;
const TITLE_SIZE: f32 = 18.0;
const BODY_SIZE: f32 = 12.0;
const LINE_HEIGHT_MM: f32 = 5.5;
const PT_TO_MM: f32 = 0.3528;
/// Average Helvetica glyph width in em, rounded up for accented capitals.
const BODY_CHAR_EM: f32 = 0.55;
const BLOCK_GAP_MM: f32 = 2.5;
const TITLE_BLOCK_MM: f32 = 14.0;

#[derive(Debug, Clone)]
pub struct ReportPerson {
    pub first_name: String,
    pub last_name: String,
    pub matricule: Option<String>,
}

impl ReportPerson {
    fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    fn display_with_matricule(&self) -> String {
        match &self.matricule {
            Some(matricule) => format!("{} ({matricule})", self.display_name()),
            None => self.display_name(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportRow {
    pub reference: String,
    pub type_name: Option<String>,
    pub title: String,
    pub status: String,
    pub priority: String,
    pub student: Option<ReportPerson>,
    pub agent: Option<ReportPerson>,
    pub created_at: Option<NaiveDateTime>,
}

impl ReportRow {
    fn created_date(&self) -> String {
        self.created_at
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    }

    fn spreadsheet_cells(&self) -> [String; 8] {
        [
            self.reference.clone(),
            self.type_name.clone().unwrap_or_default(),
            self.title.clone(),
            self.status.clone(),
            self.priority.clone(),
            self.student
                .as_ref()
                .map(ReportPerson::display_with_matricule)
                .unwrap_or_default(),
            self.agent
                .as_ref()
                .map(ReportPerson::display_name)
                .unwrap_or_default(),
            self.created_date(),
        ]
    }

    /// Block lines for the PDF, already wrapped to the page width.
    fn text_block(&self, index: usize) -> Vec<String> {
        let max_chars = body_line_chars();
        [
            format!("{}. [{}] {}", index + 1, self.reference, self.title),
            format!("Type: {}", self.type_name.as_deref().unwrap_or_default()),
            format!("Statut: {} | Priorité: {}", self.status, self.priority),
            format!(
                "Étudiant: {}",
                self.student
                    .as_ref()
                    .map(ReportPerson::display_name)
                    .unwrap_or_default()
            ),
            format!(
                "Agent assigné: {}",
                self.agent
                    .as_ref()
                    .map(ReportPerson::display_name)
                    .unwrap_or_default()
            ),
            format!("Date création: {}", self.created_date()),
        ]
        .iter()
        .flat_map(|line| wrap_line(line, max_chars))
        .collect()
    }
}

pub fn render_xlsx(rows: &[ReportRow]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    for (col, (header, width)) in COLUMNS.iter().enumerate() {
        let col = col as u16;
        worksheet.set_column_width(col, *width)?;
        worksheet.write_string_with_format(0, col, *header, &header_format)?;
    }

    for (index, row) in rows.iter().enumerate() {
        let excel_row = index as u32 + 1;
        for (col, value) in row.spreadsheet_cells().into_iter().enumerate() {
            worksheet.write_string(excel_row, col as u16, value)?;
        }
    }

    Ok(workbook.save_to_buffer()?)
}

fn body_line_chars() -> usize {
    let usable_width = PAGE_WIDTH_MM - 2.0 * MARGIN_MM;
    (usable_width / (BODY_SIZE * BODY_CHAR_EM * PT_TO_MM)).floor() as usize
}

/// Greedy word wrap; words longer than `max_chars` are split mid-word.
fn wrap_line(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while !word.is_empty() {
            let room = if current_len == 0 {
                max_chars
            } else {
                max_chars.saturating_sub(current_len + 1)
            };
            if word.len() <= room {
                if current_len > 0 {
                    current.push(' ');
                    current_len += 1;
                }
                current.extend(word.iter());
                current_len += word.len();
                break;
            }
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
                continue;
            }
            let rest = word.split_off(max_chars);
            lines.push(word.into_iter().collect());
            word = rest;
        }
    }
    if current_len > 0 {
        lines.push(current);
    }
    lines
}

/// Page index and top offset (mm from the page top) of every line, grouped by block.
///
/// A block moves to a fresh page when it does not fit in what is left of the
/// current one; blocks taller than a whole page break between lines.
pub fn layout_blocks(line_counts: &[usize]) -> Vec<Vec<(usize, f32)>> {
    let usable_bottom = PAGE_HEIGHT_MM - MARGIN_MM;
    let page_capacity = usable_bottom - MARGIN_MM;

    let mut positions = Vec::with_capacity(line_counts.len());
    let mut page = 0;
    let mut cursor = MARGIN_MM + TITLE_BLOCK_MM;
    for &lines in line_counts {
        let height = lines as f32 * LINE_HEIGHT_MM;
        let mut block = Vec::with_capacity(lines);
        if height <= page_capacity {
            if cursor + height > usable_bottom {
                page += 1;
                cursor = MARGIN_MM;
            }
            block.extend((0..lines).map(|line| (page, cursor + line as f32 * LINE_HEIGHT_MM)));
            cursor += height;
        } else {
            for _ in 0..lines {
                if cursor + LINE_HEIGHT_MM > usable_bottom {
                    page += 1;
                    cursor = MARGIN_MM;
                }
                block.push((page, cursor));
                cursor += LINE_HEIGHT_MM;
            }
        }
        positions.push(block);
        cursor += BLOCK_GAP_MM;
    }
    positions
}

pub fn render_pdf(rows: &[ReportRow]) -> Result<Vec<u8>> {
    let (doc, first_page, first_layer) = PdfDocument::new(
        PDF_TITLE,
        Mm(PAGE_WIDTH_MM),
        Mm(PAGE_HEIGHT_MM),
        "Layer 1",
    );
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|err| anyhow!("failed to load PDF font: {err:?}"))?;
    let title_font = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|err| anyhow!("failed to load PDF font: {err:?}"))?;

    let mut layer = doc.get_page(first_page).get_layer(first_layer);
    let title_width = PDF_TITLE.chars().count() as f32 * TITLE_SIZE * 0.5 * PT_TO_MM;
    let title_x = ((PAGE_WIDTH_MM - title_width) / 2.0).max(MARGIN_MM);
    layer.use_text(
        PDF_TITLE,
        TITLE_SIZE,
        Mm(title_x),
        Mm(PAGE_HEIGHT_MM - MARGIN_MM - 6.0),
        &title_font,
    );

    let blocks: Vec<Vec<String>> = rows
        .iter()
        .enumerate()
        .map(|(index, row)| row.text_block(index))
        .collect();
    let line_counts: Vec<usize> = blocks.iter().map(Vec::len).collect();

    let mut current_page = 0;
    for (lines, positions) in blocks.iter().zip(layout_blocks(&line_counts)) {
        for (line, (page, top)) in lines.iter().zip(positions) {
            while current_page < page {
                let (page_ref, layer_ref) =
                    doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1");
                layer = doc.get_page(page_ref).get_layer(layer_ref);
                current_page += 1;
            }
            write_line(&layer, &font, line, top);
        }
    }

    doc.save_to_bytes()
        .map_err(|err| anyhow!("failed to render PDF: {err:?}"))
}

fn write_line(layer: &PdfLayerReference, font: &IndirectFontRef, line: &str, top: f32) {
    let baseline = PAGE_HEIGHT_MM - top - LINE_HEIGHT_MM;
    layer.use_text(line, BODY_SIZE, Mm(MARGIN_MM), Mm(baseline), font);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(reference: &str) -> ReportRow {
        ReportRow {
            reference: reference.to_string(),
            type_name: Some("Relevé de notes".to_string()),
            title: "Demande de relevé".to_string(),
            status: "Soumise".to_string(),
            priority: "Normale".to_string(),
            student: Some(ReportPerson {
                first_name: "Awa".to_string(),
                last_name: "Bello".to_string(),
                matricule: Some("19S001".to_string()),
            }),
            agent: None,
            created_at: NaiveDate::from_ymd_opt(2024, 3, 9)
                .and_then(|date| date.and_hms_opt(10, 30, 0)),
        }
    }

    #[test]
    fn spreadsheet_cells_follow_column_order() {
        let cells = row("REQ-1").spreadsheet_cells();
        assert_eq!(cells[0], "REQ-1");
        assert_eq!(cells[1], "Relevé de notes");
        assert_eq!(cells[5], "Awa Bello (19S001)");
        assert_eq!(cells[6], "");
        assert_eq!(cells[7], "2024-03-09");
    }

    #[test]
    fn text_block_is_numbered_from_one() {
        let block = row("REQ-9").text_block(0);
        assert_eq!(block[0], "1. [REQ-9] Demande de relevé");
        assert_eq!(block[3], "Étudiant: Awa Bello");
        assert_eq!(block[4], "Agent assigné: ");
    }

    #[test]
    fn xlsx_is_a_zip_container() {
        let bytes = render_xlsx(&[row("REQ-1"), row("REQ-2")]).unwrap();
        assert!(bytes.starts_with(b"PK"));
    }

    #[test]
    fn pdf_has_pdf_header_even_when_empty() {
        assert!(render_pdf(&[]).unwrap().starts_with(b"%PDF"));
        let rows: Vec<_> = (0..40).map(|i| row(&format!("REQ-{i}"))).collect();
        assert!(render_pdf(&rows).unwrap().starts_with(b"%PDF"));
    }

    #[test]
    fn long_titles_wrap_inside_the_page_width() {
        let mut long = row("REQ-7");
        long.title = "Demande de duplicata ".repeat(12);
        long.type_name = Some("X".repeat(200));

        let max_chars = body_line_chars();
        let block = long.text_block(6);
        assert!(block.len() > 6);
        assert!(block.iter().all(|line| line.chars().count() <= max_chars));
        assert!(block[0].starts_with("7. [REQ-7] Demande de duplicata"));
        assert!(render_pdf(&[long]).unwrap().starts_with(b"%PDF"));
    }

    #[test]
    fn wrap_line_splits_on_words_then_inside_long_words() {
        assert_eq!(wrap_line("court", 10), vec!["court"]);
        assert_eq!(wrap_line("un deux trois", 7), vec!["un deux", "trois"]);
        assert_eq!(wrap_line("abcdefghij kl", 4), vec!["abcd", "efgh", "ij", "kl"]);
    }

    #[test]
    fn layout_breaks_pages_and_stays_inside_margins() {
        let counts: Vec<usize> = (0..30).map(|i| if i % 5 == 0 { 9 } else { 6 }).collect();
        let positions = layout_blocks(&counts);
        assert_eq!(positions.len(), 30);
        assert_eq!(positions[0][0], (0, MARGIN_MM + TITLE_BLOCK_MM));
        assert!(positions.last().unwrap()[0].0 >= 1);

        for (block, count) in positions.iter().zip(&counts) {
            assert_eq!(block.len(), *count);
            assert!(block.iter().all(|(page, _)| *page == block[0].0));
            for (_, top) in block {
                assert!(top + LINE_HEIGHT_MM <= PAGE_HEIGHT_MM - MARGIN_MM + 1e-3);
            }
        }
    }

    #[test]
    fn layout_splits_blocks_taller_than_a_page() {
        let positions = layout_blocks(&[2, 80]);
        let tall = &positions[1];
        assert_eq!(tall.len(), 80);
        assert_eq!(tall[0].0, 0);
        assert!(tall.last().unwrap().0 >= 1);
        for (_, top) in tall {
            assert!(top + LINE_HEIGHT_MM <= PAGE_HEIGHT_MM - MARGIN_MM + 1e-3);
        }
    }
}
