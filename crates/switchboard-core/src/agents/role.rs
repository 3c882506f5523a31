//! Agent roles and the role table
//!
//! Roles form a closed set. Everything that varies per role (display name,
//! default prompt, expected output contract) lives in [`RoleProfile`], so adding a
//! role is a table edit rather than new control flow.

use serde::{Deserialize, Serialize};

/// The closed set of agent roles a bot can link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentRole {
    #[serde(rename = "triagem")]
    Triage,
    #[serde(rename = "comercial")]
    Commercial,
    #[serde(rename = "guia_unidades")]
    UnitsGuide,
    #[serde(rename = "cotador")]
    Quoter,
    #[serde(rename = "consultor_tecnico")]
    TechnicalConsultant,
    #[serde(rename = "resumo")]
    Summary,
    #[serde(rename = "coordenador")]
    Coordinator,
    #[serde(rename = "cliente_simulado_padrao")]
    SimulatedCustomer,
}

/// Shape of the output an agent is asked to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputContract {
    RouteDecision,
    CoordinatorDecision,
    AgentReply,
    HandoffSummary,
    PlainText,
}

impl OutputContract {
    /// Whether the provider should be asked for a JSON object
    pub fn is_structured(&self) -> bool {
        !matches!(self, Self::PlainText)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::RouteDecision => "RouteDecision",
            Self::CoordinatorDecision => "CoordinatorDecision",
            Self::AgentReply => "AgentReply",
            Self::HandoffSummary => "HandoffSummary",
            Self::PlainText => "text",
        }
    }
}

/// Static description of a role
#[derive(Debug, Clone, Copy)]
pub struct RoleProfile {
    pub role: AgentRole,
    pub label: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub contract: OutputContract,
    pub default_prompt: &'static str,
}

const ROLE_TABLE: &[RoleProfile] = &[
    RoleProfile {
        role: AgentRole::Triage,
        label: "triagem",
        display_name: "Agente Triagem",
        description: "Roteamento inicial e classificacao do atendimento.",
        contract: OutputContract::RouteDecision,
        default_prompt: "Voce e o Agente Triagem.\n\
            Analise a mensagem do cliente e decida o melhor agente destino.\n\
            Responda SOMENTE com um objeto JSON no contrato RouteDecision:\n\
            {\"agente_destino\", \"confianca\", \"pergunta_clareadora\", \"mensagem_transicao\", \
            \"precisa_humano\", \"motivo\", \"intencao\", \"tags\"}.\n\
            - Se pediu_humano for True ou houver nomes_citados, use agente_destino=humano e precisa_humano=true.\n\
            - Se fora_horario for True, registre isso no motivo e priorize rotas seguras.\n\
            - Se a intencao estiver ambigua, use pergunta_clareadora e agente_destino=coordenador.\n\
            - Nunca invente informacoes e nao responda diretamente ao cliente.\n",
    },
    RoleProfile {
        role: AgentRole::Commercial,
        label: "comercial",
        display_name: "Agente Comercial",
        description: "Conducao comercial com foco em fechamento de vendas.",
        contract: OutputContract::AgentReply,
        default_prompt: "Voce e o Agente Comercial. Conduza o atendimento com foco em fechar a venda.\n\
            Responda SEMPRE com um objeto JSON no contrato AgentReply.\n\
            Nao invente precos, estoque ou prazos. Se faltar informacao, use acao=perguntar e preencha dados_faltantes.\n\
            Se o cliente pedir humano, defina precisa_humano=true e motivo_escalacao.\n",
    },
    RoleProfile {
        role: AgentRole::UnitsGuide,
        label: "guia_unidades",
        display_name: "Agente Guia de Unidades",
        description: "Informacoes sobre lojas, enderecos e contatos.",
        contract: OutputContract::AgentReply,
        default_prompt: "Voce e o Agente Guia de Unidades. Responda sobre enderecos, horarios, contatos e referencias das lojas.\n\
            Responda SEMPRE com um objeto JSON no contrato AgentReply.\n\
            Se faltar cidade, bairro ou unidade, use acao=perguntar e dados_faltantes.\n",
    },
    RoleProfile {
        role: AgentRole::Quoter,
        label: "cotador",
        display_name: "Agente Cotador",
        description: "Consulta de precos e servicos das lojas.",
        contract: OutputContract::AgentReply,
        default_prompt: "Voce e o Agente Cotador. Responda sobre precos e servicos.\n\
            Responda SEMPRE com um objeto JSON no contrato AgentReply.\n\
            Use apenas dados confiaveis. Se nao houver dados, pergunte o necessario ou escale para humano.\n",
    },
    RoleProfile {
        role: AgentRole::TechnicalConsultant,
        label: "consultor_tecnico",
        display_name: "Agente Consultor Tecnico",
        description: "Orientacao tecnica sobre produtos e servicos.",
        contract: OutputContract::AgentReply,
        default_prompt: "Voce e o Agente Consultor Tecnico. Esclareca duvidas tecnicas, compatibilidade e vantagens de produtos.\n\
            Responda SEMPRE com um objeto JSON no contrato AgentReply.\n\
            Solicite dados do veiculo quando necessario. Nao invente informacoes.\n",
    },
    RoleProfile {
        role: AgentRole::Summary,
        label: "resumo",
        display_name: "Agente Resumo",
        description: "Resumo do atendimento para o humano assumir.",
        contract: OutputContract::HandoffSummary,
        default_prompt: "Voce e o Agente Resumo. Gere um resumo objetivo para o humano assumir o caso.\n\
            Responda SOMENTE com um objeto JSON no contrato HandoffSummary:\n\
            {\"resumo\", \"dados_relevantes\", \"pendencias\", \"sentimento\", \"sugestao_proxima_acao\"}.\n\
            Inicie o resumo com [CRITICO] se houver conflito ou falhas repetidas.\n",
    },
    RoleProfile {
        role: AgentRole::Coordinator,
        label: "coordenador",
        display_name: "Agente Coordenador",
        description: "Decisoes e escalonamento em casos complexos.",
        contract: OutputContract::CoordinatorDecision,
        default_prompt: "Voce e o Agente Coordenador. Decide a melhor acao quando houver duvidas ou falhas no atendimento.\n\
            Responda SEMPRE com um objeto JSON no contrato CoordinatorDecision.\n\
            - Se redirecionar, informe agente_destino.\n\
            - Se escalar humano, defina agente_destino=humano e precisa_resumo=true.\n\
            - Se perguntar, inclua uma pergunta objetiva em mensagem.\n",
    },
    RoleProfile {
        role: AgentRole::SimulatedCustomer,
        label: "cliente_simulado_padrao",
        display_name: "Cliente Simulado",
        description: "Simula um cliente real para testar o bot.",
        contract: OutputContract::PlainText,
        default_prompt: "Voce e um cliente entrando em contato com a loja. Escreva apenas a sua proxima mensagem.\n\
            Quando o seu objetivo estiver resolvido, termine a mensagem com [FIM].\n",
    },
];

impl AgentRole {
    pub const ALL: [AgentRole; 8] = [
        AgentRole::Triage,
        AgentRole::Commercial,
        AgentRole::UnitsGuide,
        AgentRole::Quoter,
        AgentRole::TechnicalConsultant,
        AgentRole::Summary,
        AgentRole::Coordinator,
        AgentRole::SimulatedCustomer,
    ];

    pub fn profile(&self) -> &'static RoleProfile {
        ROLE_TABLE
            .iter()
            .find(|s| s.role == *self)
            .unwrap_or(&ROLE_TABLE[0])
    }

    pub fn label(&self) -> &'static str {
        self.profile().label
    }

    pub fn contract(&self) -> OutputContract {
        self.profile().contract
    }

    /// Roles that answer the customer directly
    pub fn is_specialist(&self) -> bool {
        matches!(
            self,
            Self::Commercial | Self::UnitsGuide | Self::Quoter | Self::TechnicalConsultant
        )
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Resolve a free-form role label (persisted role column, agent name, or a
/// model-provided destination) into a role.
///
/// Returns `None` for empty labels, labels that point at a human operator,
/// and anything unrecognised.
pub fn resolve_role_label(value: &str) -> Option<AgentRole> {
    let label = normalize_label(value);
    if label.is_empty() || refers_to_human(&label) {
        return None;
    }

    let underscored = label.replace(' ', "_");
    if let Some(profile) = ROLE_TABLE
        .iter()
        .find(|s| s.label == label || s.label == underscored)
    {
        return Some(profile.role);
    }

    const KEYWORDS: &[(&[&str], AgentRole)] = &[
        (&["simulado", "simulated"], AgentRole::SimulatedCustomer),
        (&["triagem", "triage", "roteador", "router"], AgentRole::Triage),
        (&["comercial", "venda", "sales"], AgentRole::Commercial),
        (&["guia", "unidade", "loja"], AgentRole::UnitsGuide),
        (&["cotador", "cotacao", "preco", "quote"], AgentRole::Quoter),
        (&["consultor", "tecnico", "technical"], AgentRole::TechnicalConsultant),
        (&["resumo", "summary"], AgentRole::Summary),
        (&["coordenador", "supervisor", "coordinator"], AgentRole::Coordinator),
    ];

    KEYWORDS
        .iter()
        .find(|(words, _)| words.iter().any(|w| label.contains(w)))
        .map(|(_, role)| *role)
}

/// Whether a destination label points at a human operator
pub fn refers_to_human(value: &str) -> bool {
    let label = normalize_label(value);
    ["humano", "atendente", "human"]
        .iter()
        .any(|w| label.contains(w))
}

/// Lowercase, strip Portuguese diacritics, and turn `_`/`-` into spaces.
fn normalize_label(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' | 'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'a',
            'é' | 'ê' | 'è' | 'É' | 'Ê' | 'È' => 'e',
            'í' | 'ì' | 'î' | 'Í' | 'Ì' | 'Î' => 'i',
            'ó' | 'ô' | 'õ' | 'ò' | 'Ó' | 'Ô' | 'Õ' | 'Ò' => 'o',
            'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
            'ç' | 'Ç' => 'c',
            '_' | '-' => ' ',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_role_has_a_table_entry() {
        for role in AgentRole::ALL {
            assert_eq!(role.profile().role, role);
        }
    }

    #[test]
    fn test_contracts() {
        assert_eq!(AgentRole::Triage.contract(), OutputContract::RouteDecision);
        assert_eq!(AgentRole::Coordinator.contract(), OutputContract::CoordinatorDecision);
        assert_eq!(AgentRole::Summary.contract(), OutputContract::HandoffSummary);
        assert_eq!(AgentRole::Quoter.contract(), OutputContract::AgentReply);
        assert_eq!(AgentRole::SimulatedCustomer.contract(), OutputContract::PlainText);
        assert!(!OutputContract::PlainText.is_structured());
    }

    #[test]
    fn test_resolve_exact_labels() {
        assert_eq!(resolve_role_label("cotador"), Some(AgentRole::Quoter));
        assert_eq!(resolve_role_label("guia_unidades"), Some(AgentRole::UnitsGuide));
        assert_eq!(resolve_role_label("Consultor Técnico"), Some(AgentRole::TechnicalConsultant));
        assert_eq!(resolve_role_label("COORDENADOR"), Some(AgentRole::Coordinator));
    }

    #[test]
    fn test_resolve_fuzzy_labels() {
        assert_eq!(resolve_role_label("Agente de Vendas"), Some(AgentRole::Commercial));
        assert_eq!(resolve_role_label("Cotação de pneus"), Some(AgentRole::Quoter));
        assert_eq!(resolve_role_label("Supervisor"), Some(AgentRole::Coordinator));
        assert_eq!(
            resolve_role_label("cliente_simulado_padrao"),
            Some(AgentRole::SimulatedCustomer)
        );
    }

    #[test]
    fn test_resolve_rejects_humans_and_noise() {
        assert_eq!(resolve_role_label("humano"), None);
        assert_eq!(resolve_role_label("Atendente"), None);
        assert_eq!(resolve_role_label(""), None);
        assert_eq!(resolve_role_label("   "), None);
        assert_eq!(resolve_role_label("financeiro"), None);
    }

    #[test]
    fn test_role_serde_uses_labels() {
        let json = serde_json::to_string(&AgentRole::UnitsGuide).unwrap();
        assert_eq!(json, "\"guia_unidades\"");
        let role: AgentRole = serde_json::from_str("\"consultor_tecnico\"").unwrap();
        assert_eq!(role, AgentRole::TechnicalConsultant);
    }

    #[test]
    fn test_specialists() {
        assert!(AgentRole::Quoter.is_specialist());
        assert!(!AgentRole::Coordinator.is_specialist());
        assert!(!AgentRole::Summary.is_specialist());
    }
}
